//! Local collaborator traits and in-memory implementations for the
//! post-approval steps.
//!
//! Every step must be safe to run twice for the same order: a
//! reconciliation re-runs the whole post-approval sequence.

pub mod coupons;
pub mod inventory;
pub mod orders;

pub use coupons::{CouponLedger, InMemoryCouponLedger};
pub use inventory::{
    InMemoryInventory, InventoryAdjuster, InventoryReport, ItemAdjustment, StockOutcome,
};
pub use orders::{InMemoryOrderWriter, OrderWriter};
