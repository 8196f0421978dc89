//! Shared value types for the storefront payment service: identifiers,
//! money and line items.

pub mod ids;
pub mod line_item;
pub mod money;

pub use ids::{BuyerId, CouponId, OrderId, ProductId};
pub use line_item::LineItem;
pub use money::Money;
