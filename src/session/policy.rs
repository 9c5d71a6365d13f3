//! Usage policy - decides whether the next AI turn may run

use crate::domain::{SubscriptionTier, UsageState};

/// AI turns available on the free tier
pub const FREE_LIMIT: u32 = 5;

/// Outcome of the usage gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDecision {
    Allow,
    Block,
}

/// Block iff the user is on the free tier and has used up the limit
pub fn decide(tier: SubscriptionTier, count: u32) -> UsageDecision {
    UsagePolicy::default().decide(tier, count)
}

/// Usage gate with a configurable free-tier limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsagePolicy {
    free_limit: u32,
}

impl Default for UsagePolicy {
    fn default() -> Self {
        Self { free_limit: FREE_LIMIT }
    }
}

impl UsagePolicy {
    pub fn new(free_limit: u32) -> Self {
        Self { free_limit }
    }

    pub fn free_limit(&self) -> u32 {
        self.free_limit
    }

    pub fn decide(&self, tier: SubscriptionTier, count: u32) -> UsageDecision {
        match tier {
            SubscriptionTier::Free if count >= self.free_limit => UsageDecision::Block,
            _ => UsageDecision::Allow,
        }
    }

    pub fn decide_for(&self, usage: &UsageState) -> UsageDecision {
        self.decide(usage.subscription_tier, usage.interaction_count)
    }

    /// Turns left before the gate closes; `None` means unlimited
    pub fn remaining(&self, usage: &UsageState) -> Option<u32> {
        match usage.subscription_tier {
            SubscriptionTier::Free => Some(self.free_limit.saturating_sub(usage.interaction_count)),
            SubscriptionTier::Premium => None,
        }
    }
}
