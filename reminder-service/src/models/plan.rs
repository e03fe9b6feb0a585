//! Subscription plan tiers, looked up per user for quota enforcement.

use serde::{Deserialize, Serialize};

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Pro,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "pro" => PlanTier::Pro,
            _ => PlanTier::Free,
        }
    }

    /// Unrestricted tiers are never quota-gated.
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, PlanTier::Pro)
    }
}
