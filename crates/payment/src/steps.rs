//! Post-approval saga step names.

/// Approval call against the payment gateway.
pub const STEP_APPROVE: &str = "approve";

/// Step name: write the finalized order record.
pub const STEP_COMMIT_ORDER: &str = "commit_order";

/// Step name: mark the coupon consumed.
pub const STEP_CONSUME_COUPON: &str = "consume_coupon";

/// Step name: decrement stock for every line item.
pub const STEP_DECREMENT_INVENTORY: &str = "decrement_inventory";
