//! Results reported to the callers of the orchestrator.

use common::OrderId;
use serde::Serialize;

use crate::intent::{ApprovalResult, OrderRecord};
use crate::ledger::StepFailure;

/// How a finalize (or reconciliation) run ended, given that the charge was
/// not refused.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalizeOutcome {
    /// Charge approved and all local effects applied.
    Completed { order: OrderRecord },
    /// Charge approved but at least one local step failed. The buyer has
    /// paid; the order needs reconciliation.
    Degraded(DegradedReport),
    /// The approval outcome could not be determined yet.
    ApprovalPending { order_id: OrderId },
}

impl FinalizeOutcome {
    pub fn order_id(&self) -> &OrderId {
        match self {
            FinalizeOutcome::Completed { order } => &order.order_id,
            FinalizeOutcome::Degraded(report) => &report.order_id,
            FinalizeOutcome::ApprovalPending { order_id } => order_id,
        }
    }
}

/// Details of a degraded finalize.
#[derive(Debug, Clone, Serialize)]
pub struct DegradedReport {
    pub order_id: OrderId,
    pub approval: ApprovalResult,
    pub order: Option<OrderRecord>,
    pub failures: Vec<StepFailure>,
}

/// Why a pending payment is being abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AbandonReason {
    /// The buyer cancelled on the gateway page.
    #[serde(rename = "CANCEL")]
    Cancelled,
    /// The gateway reported a failed payment.
    #[serde(rename = "FAIL")]
    Failed,
}

impl AbandonReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbandonReason::Cancelled => "CANCEL",
            AbandonReason::Failed => "FAIL",
        }
    }
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `abandon`, returned whether or not an intent was pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbandonOutcome {
    pub order_id: OrderId,
    pub reason: AbandonReason,
    /// True if a pending intent was removed by this call.
    pub released: bool,
}
