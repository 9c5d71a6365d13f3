//! Domain types for lesson planning sessions

mod artifact;
mod context;
mod conversation;
mod turn;
mod usage;
mod user;

pub use artifact::{Artifact, ArtifactKind};
pub use context::{ContextConfiguration, UploadedFile};
pub use conversation::{ConversationSummary, StoredConversation};
pub use turn::{ConversationTurn, Sender, TurnOrigin};
pub use usage::{SubscriptionTier, UsageState};
pub use user::UserIdentity;
