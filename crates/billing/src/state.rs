//! Subscription record and state classification
//!
//! `SubscriptionState::classify` is the single place subscription flags are
//! interpreted. It is recomputed on every read and never stored, so the
//! dashboard and the action dispatch path can never disagree about what a
//! subscription currently is.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// An account's subscription record as persisted.
///
/// No `provider_subscription_id` means no recurring billing relationship:
/// cancel and reactivate are unavailable operations in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan_id: Option<String>,
    pub vm_count: i32,
    pub expires_at: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub provider_subscription_id: Option<String>,
}

impl Subscription {
    /// An empty record for accounts that never subscribed
    pub fn empty() -> Self {
        Self {
            plan_id: None,
            vm_count: 0,
            expires_at: None,
            cancel_at_period_end: false,
            provider_subscription_id: None,
        }
    }

    pub fn is_provider_backed(&self) -> bool {
        self.provider_subscription_id.is_some()
    }
}

/// The finite state a subscription record classifies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// No plan on record
    None,
    Active,
    /// Cancellation requested, paid period still running
    Cancelling,
    Expired,
}

impl SubscriptionState {
    /// Classify a subscription record at instant `now`.
    ///
    /// Evaluated as a strict priority chain; total and deterministic. A null
    /// expiry is a perpetual (admin-granted) subscription. An expiry in the
    /// past always wins over the cancel flag.
    pub fn classify(subscription: &Subscription, now: OffsetDateTime) -> Self {
        if subscription.plan_id.is_none() {
            return SubscriptionState::None;
        }
        let expires_at = match subscription.expires_at {
            None => return SubscriptionState::Active,
            Some(ts) => ts,
        };
        if expires_at <= now {
            return SubscriptionState::Expired;
        }
        if subscription.cancel_at_period_end {
            return SubscriptionState::Cancelling;
        }
        SubscriptionState::Active
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::None => "none",
            SubscriptionState::Active => "active",
            SubscriptionState::Cancelling => "cancelling",
            SubscriptionState::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
