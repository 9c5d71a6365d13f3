//! Backend collaborators
//!
//! Identity, profile, text extraction, curriculum, export and conversation
//! persistence. The session core only sees the traits; `memory` and `fs`
//! hold the implementations shipped with the crate.

mod error;
pub mod fs;
pub mod memory;
mod traits;

pub use error::BackendError;
pub use fs::{CommandExtractor, DirCurriculum, DirExporter, JsonConversationStore, JsonProfileStore};
pub use memory::{
    EchoExtractor, InMemoryConversationStore, InMemoryProfileStore, MemoryExporter, StaticCurriculum, StaticIdentity,
};
pub use traits::{
    ArtifactExporter, ConversationStore, CurriculumSource, IdentityProvider, ProfileStore, TextExtractor,
};
