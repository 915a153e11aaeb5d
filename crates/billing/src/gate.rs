//! VM operation authorization gate
//!
//! Maps subscription state + VM status to the permitted subset of lifecycle
//! operations. Pure and synchronous; the dispatch path re-evaluates it
//! immediately before calling the hypervisor, never from a cached result,
//! since subscription state can change between render and click.

use serde::Serialize;
use slicevm_shared::{VmOperation, VmStatus};

use crate::state::SubscriptionState;

/// Why an operation was excluded, when the exclusion comes from the
/// subscription state. `None` on a denied operation means the VM status alone
/// made the operation inapplicable (e.g. starting a running VM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    NoSubscription,
    SubscriptionEnding,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::NoSubscription => "no_subscription",
            DenialReason::SubscriptionEnding => "subscription_ending",
        }
    }
}

/// Verdict for a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationDecision {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
}

/// The full permission set for one VM at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VmPermissions {
    pub start: OperationDecision,
    pub stop: OperationDecision,
    pub shutdown: OperationDecision,
    pub reboot: OperationDecision,
}

impl VmPermissions {
    /// Evaluate the policy table for `(state, status)`.
    ///
    /// Admin accounts bypass the table entirely and get the full set.
    pub fn evaluate(state: SubscriptionState, status: VmStatus, is_admin: bool) -> Self {
        let decide = |op: VmOperation| {
            if is_admin {
                return OperationDecision {
                    allowed: true,
                    reason: None,
                };
            }
            let allowed = is_allowed(state, status, op);
            let reason = if allowed {
                None
            } else if is_allowed(SubscriptionState::Active, status, op) {
                // The status would have permitted it; the state is what denies
                state_denial_reason(state)
            } else {
                None
            };
            OperationDecision { allowed, reason }
        };

        VmPermissions {
            start: decide(VmOperation::Start),
            stop: decide(VmOperation::Stop),
            shutdown: decide(VmOperation::Shutdown),
            reboot: decide(VmOperation::Reboot),
        }
    }

    pub fn decision(&self, op: VmOperation) -> OperationDecision {
        match op {
            VmOperation::Start => self.start,
            VmOperation::Stop => self.stop,
            VmOperation::Shutdown => self.shutdown,
            VmOperation::Reboot => self.reboot,
        }
    }

    pub fn allows(&self, op: VmOperation) -> bool {
        self.decision(op).allowed
    }

    /// Operations permitted right now, in display order
    pub fn permitted(&self) -> Vec<VmOperation> {
        VmOperation::ALL
            .into_iter()
            .filter(|op| self.allows(*op))
            .collect()
    }
}

/// The policy table.
///
/// Force-stop is permitted whenever the VM holds host resources (running or
/// paused), independent of subscription state: an expired account must always
/// be able to release what it is consuming.
fn is_allowed(state: SubscriptionState, status: VmStatus, op: VmOperation) -> bool {
    if op == VmOperation::Stop {
        return status.holds_resources();
    }
    match (state, status, op) {
        (SubscriptionState::Active, VmStatus::Stopped, VmOperation::Start) => true,
        (
            SubscriptionState::Active,
            VmStatus::Running,
            VmOperation::Shutdown | VmOperation::Reboot,
        ) => true,
        (SubscriptionState::Cancelling, VmStatus::Running, VmOperation::Shutdown) => true,
        _ => false,
    }
}

fn state_denial_reason(state: SubscriptionState) -> Option<DenialReason> {
    match state {
        SubscriptionState::None | SubscriptionState::Expired => Some(DenialReason::NoSubscription),
        SubscriptionState::Cancelling => Some(DenialReason::SubscriptionEnding),
        SubscriptionState::Active => None,
    }
}
