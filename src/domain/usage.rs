//! Subscription tier and interaction counter mirrored from the user profile

use serde::{Deserialize, Serialize};

/// Subscription tier of the signed-in user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionTier::Free => write!(f, "free"),
            SubscriptionTier::Premium => write!(f, "premium"),
        }
    }
}

/// Usage counters for the current subscription period
///
/// `interaction_count` only grows, and only after a successful AI turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageState {
    pub interaction_count: u32,
    pub subscription_tier: SubscriptionTier,
}

impl UsageState {
    pub fn new(subscription_tier: SubscriptionTier, interaction_count: u32) -> Self {
        Self {
            interaction_count,
            subscription_tier,
        }
    }

    /// Record one successful AI turn
    pub fn record_interaction(&mut self) {
        self.interaction_count = self.interaction_count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_free_and_zero() {
        let usage = UsageState::default();
        assert_eq!(usage.subscription_tier, SubscriptionTier::Free);
        assert_eq!(usage.interaction_count, 0);
    }

    #[test]
    fn test_record_interaction_saturates() {
        let mut usage = UsageState::new(SubscriptionTier::Premium, u32::MAX);
        usage.record_interaction();
        assert_eq!(usage.interaction_count, u32::MAX);
    }

    #[test]
    fn test_serde_shape() {
        let usage: UsageState = serde_json::from_str(r#"{"interactionCount":3,"subscriptionTier":"premium"}"#).unwrap();
        assert_eq!(usage, UsageState::new(SubscriptionTier::Premium, 3));
    }
}
