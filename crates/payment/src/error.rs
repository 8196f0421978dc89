//! Payment error types.

use common::{CouponId, Money, OrderId, ProductId};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::state::PaymentState;

/// Errors that can occur while preparing or finalizing a payment.
///
/// Variants fall into three groups. Before the gateway approval
/// (`DuplicateOrder`, `InvalidRequest`, `CouponUnavailable`,
/// `GatewayUnavailable`, `GatewayRejected`) the caller may start over with a
/// fresh prepare. Approval failures (`ApprovalRejected`, `AmountMismatch`)
/// are terminal and no money was kept. After approval (`Persistence`,
/// `InsufficientStock`, `StepTimedOut`) the charge stands and the order is
/// routed to reconciliation instead of being reported as a failed payment.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// A pending intent with this order id is already registered.
    #[error("Duplicate order id: {0}")]
    DuplicateOrder(OrderId),

    /// No pending intent for this order id: already processed, abandoned,
    /// expired or never issued.
    #[error("No pending payment for order {0}")]
    Absent(OrderId),

    /// The purchase request failed validation.
    #[error("Invalid payment request: {0}")]
    InvalidRequest(String),

    /// The coupon is unknown or already consumed.
    #[error("Coupon unavailable: {0}")]
    CouponUnavailable(CouponId),

    /// The gateway could not be reached or answered with a server error.
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The gateway refused to create the payment intent.
    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    /// The gateway refused the approval (invalid or already used proof).
    #[error("Payment approval rejected: {0}")]
    ApprovalRejected(String),

    /// The approved amount differs from the intent total.
    #[error("Approved amount {approved} does not match expected total {expected} for order {order_id}")]
    AmountMismatch {
        order_id: OrderId,
        expected: Money,
        approved: Money,
    },

    /// A local store failed to persist a change.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// One or more products could not be decremented.
    #[error("Insufficient stock for products: {}", format_products(.0))]
    InsufficientStock(Vec<ProductId>),

    /// A post-approval step did not finish within its timeout.
    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    StepTimedOut { step: String, timeout_ms: u64 },

    /// No payment record exists for this order id.
    #[error("Payment record not found: {0}")]
    NotFound(OrderId),

    /// The order is not in a state that reconciliation can resume.
    #[error("Order {order_id} cannot be reconciled from state {state}")]
    NotReconcilable {
        order_id: OrderId,
        state: PaymentState,
    },
}

impl PaymentError {
    /// Returns true for failures that mean the buyer was not charged.
    pub fn is_payment_failure(&self) -> bool {
        matches!(
            self,
            PaymentError::GatewayUnavailable(_)
                | PaymentError::ApprovalRejected(_)
                | PaymentError::AmountMismatch { .. }
        )
    }
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(reason)
            | GatewayError::Malformed(reason)
            | GatewayError::OutcomeUnknown(reason) => PaymentError::GatewayUnavailable(reason),
            GatewayError::Rejected(reason) => PaymentError::GatewayRejected(reason),
            GatewayError::ApprovalRejected(reason) => PaymentError::ApprovalRejected(reason),
        }
    }
}

fn format_products(products: &[ProductId]) -> String {
    products
        .iter()
        .map(ProductId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience type alias for payment results.
pub type Result<T> = std::result::Result<T, PaymentError>;
