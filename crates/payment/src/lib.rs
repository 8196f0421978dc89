//! Payment finalization for the storefront.
//!
//! A payment runs in three phases:
//! 1. `prepare` registers the purchase with the gateway and keeps the intent
//!    pending in memory.
//! 2. The gateway calls back and `finalize` takes the intent (exactly once),
//!    approves the charge, then writes the order, consumes the coupon and
//!    decrements stock.
//! 3. Cancel and fail callbacks `abandon` the intent.
//!
//! Once the gateway approves a charge nothing is rolled back. Local failures
//! after that point leave the order in a degraded state that operators can
//! query and `reconcile`.

pub mod config;
pub mod error;
pub mod gateway;
pub mod intent;
pub mod ledger;
pub mod orchestrator;
pub mod outcome;
pub mod services;
pub mod state;
pub mod steps;
pub mod store;

pub use config::OrchestratorConfig;
pub use error::PaymentError;
pub use gateway::{
    GatewayError, InMemoryPaymentGateway, KakaoPayConfig, KakaoPayGateway, PaymentGateway,
};
pub use intent::{
    ApprovalResult, GatewayIntentHandle, OrderRecord, OrderStatus, PaymentIntent, PaymentRequest,
    PreparedPayment,
};
pub use ledger::{PaymentLedger, PaymentRecord, StepFailure};
pub use orchestrator::PaymentOrchestrator;
pub use outcome::{AbandonOutcome, AbandonReason, DegradedReport, FinalizeOutcome};
pub use services::{
    CouponLedger, InMemoryCouponLedger, InMemoryInventory, InMemoryOrderWriter, InventoryAdjuster,
    InventoryReport, ItemAdjustment, OrderWriter, StockOutcome,
};
pub use state::PaymentState;
pub use store::PendingPaymentStore;
