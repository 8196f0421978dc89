//! Per-order payment state machine.

use serde::{Deserialize, Serialize};

/// The state of one order's payment in its lifecycle.
///
/// State transitions:
/// ```text
/// (none) ──► Pending ──┬──► Approving ──┬──► Finalized
///                      │                ├──► RemoteApprovedLocalFailed ──┐
///                      │                ├──► ApprovalUnknown ────────────┤
///                      │                └──► PaymentFailed               │
///                      ├──► Abandoned                      Reconciling ◄─┘
///                      └──► Expired
/// ```
///
/// `Reconciling` leads back to any of the outcomes reachable from
/// `Approving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    /// Intent registered, waiting for the gateway callback.
    Pending,

    /// Intent taken by a finalize call; the gateway approval is in flight.
    Approving,

    /// Charge approved and every local step applied (terminal).
    Finalized,

    /// Charge approved but a local step failed (terminal, degraded).
    RemoteApprovedLocalFailed,

    /// Approval timed out and the gateway could not confirm the outcome.
    ApprovalUnknown,

    /// An operator reconciliation is re-running the post-approval steps.
    Reconciling,

    /// The gateway did not approve the charge (terminal).
    PaymentFailed,

    /// The buyer cancelled or the gateway reported a failure (terminal).
    Abandoned,

    /// The pending intent outlived its retention window (terminal).
    Expired,
}

impl PaymentState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            PaymentState::Pending | PaymentState::Approving | PaymentState::Reconciling
        )
    }

    /// Returns true if the charge may have happened without local effects
    /// being fully applied.
    pub fn needs_reconciliation(&self) -> bool {
        matches!(
            self,
            PaymentState::RemoteApprovedLocalFailed | PaymentState::ApprovalUnknown
        )
    }

    /// Returns true if nothing further will happen to this order.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() && !self.needs_reconciliation()
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "PENDING",
            PaymentState::Approving => "APPROVING",
            PaymentState::Finalized => "FINALIZED",
            PaymentState::RemoteApprovedLocalFailed => "REMOTE_APPROVED_LOCAL_FAILED",
            PaymentState::ApprovalUnknown => "APPROVAL_UNKNOWN",
            PaymentState::Reconciling => "RECONCILING",
            PaymentState::PaymentFailed => "PAYMENT_FAILED",
            PaymentState::Abandoned => "ABANDONED",
            PaymentState::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
