//! Payment gateway abstraction and implementations.
//!
//! The gateway is treated as an opaque remote procedure with three calls:
//! create an intent, approve it with the buyer's proof token, and look up
//! an order's approval status after an ambiguous approve.

pub mod kakao;
pub mod memory;

use async_trait::async_trait;

use crate::intent::{ApprovalResult, GatewayIntentHandle, PaymentIntent};

pub use kakao::{KakaoPayConfig, KakaoPayGateway};
pub use memory::InMemoryPaymentGateway;

/// Errors surfaced by a payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Network failure, timeout or server-side error. Transient.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway refused to create the intent.
    #[error("gateway rejected request: {0}")]
    Rejected(String),

    /// The gateway refused the approval: proof invalid or already consumed.
    #[error("approval rejected: {0}")]
    ApprovalRejected(String),

    /// The gateway answered with a body that could not be understood.
    #[error("malformed gateway response: {0}")]
    Malformed(String),

    /// The approve request may have reached the gateway but no usable answer
    /// came back. The charge may or may not exist; only a status lookup can
    /// tell.
    #[error("approval outcome unknown: {0}")]
    OutcomeUnknown(String),
}

/// Remote payment provider operations.
///
/// A successful `approve` is the point of no return: money has moved and
/// everything after it must eventually complete.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers the purchase with the gateway and returns where the buyer
    /// should be sent to pay.
    async fn create_intent(&self, intent: &PaymentIntent)
    -> Result<GatewayIntentHandle, GatewayError>;

    /// Approves the payment using the proof token issued to the buyer.
    async fn approve(
        &self,
        intent: &PaymentIntent,
        proof: &str,
    ) -> Result<ApprovalResult, GatewayError>;

    /// Queries whether the gateway holds an approved charge for the intent.
    ///
    /// `Ok(None)` means the gateway confirms that no charge was made.
    async fn lookup(&self, intent: &PaymentIntent) -> Result<Option<ApprovalResult>, GatewayError>;
}
