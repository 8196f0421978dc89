//! Inventory adjuster trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{LineItem, OrderId, ProductId};
use serde::Serialize;

use crate::error::{PaymentError, Result};

/// Outcome of decrementing stock for one line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockOutcome {
    Decremented,
    InsufficientStock { available: u32 },
    UnknownProduct,
}

/// Per-item result of a decrement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemAdjustment {
    pub product_id: ProductId,
    pub requested: u32,
    pub outcome: StockOutcome,
}

/// Result of decrementing stock for an order, one entry per line item in
/// line order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryReport {
    pub items: Vec<ItemAdjustment>,
}

impl InventoryReport {
    /// Returns true if every line item was decremented.
    pub fn all_decremented(&self) -> bool {
        self.items
            .iter()
            .all(|item| item.outcome == StockOutcome::Decremented)
    }

    /// Returns the products that could not be decremented.
    pub fn shortfalls(&self) -> Vec<ProductId> {
        self.items
            .iter()
            .filter(|item| item.outcome != StockOutcome::Decremented)
            .map(|item| item.product_id.clone())
            .collect()
    }
}

/// Decrements product stock for paid orders.
///
/// Partial success is reported per item rather than failing the call; by
/// the time this runs the charge has succeeded and a shortfall is a
/// fulfillment problem.
#[async_trait]
pub trait InventoryAdjuster: Send + Sync {
    /// Decrements stock for `items` on behalf of `order_id`.
    ///
    /// Lines already decremented for the same order are reported as
    /// `Decremented` without touching stock again.
    async fn decrement(&self, order_id: &OrderId, items: &[LineItem]) -> Result<InventoryReport>;

    /// Drops the idempotency keys kept for a settled order. Stock is not
    /// restored.
    async fn forget(&self, order_id: &OrderId) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<ProductId, u32>,
    /// (order, line index) pairs already applied.
    applied: HashSet<(OrderId, usize)>,
    fail_on_decrement: bool,
}

/// In-memory stock counts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventory {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventory {
    /// Creates a new, empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stock count of a product.
    pub fn set_stock(&self, product_id: impl Into<ProductId>, count: u32) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .stock
            .insert(product_id.into(), count);
    }

    /// Returns the stock count of a product, if it is stocked.
    pub fn stock(&self, product_id: &ProductId) -> Option<u32> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .stock
            .get(product_id)
            .copied()
    }

    /// Configures the inventory to fail every decrement call.
    pub fn set_fail_on_decrement(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_decrement = fail;
    }

    /// Returns the number of (order, line) keys currently remembered.
    pub fn applied_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .applied
            .len()
    }
}

#[async_trait]
impl InventoryAdjuster for InMemoryInventory {
    async fn decrement(&self, order_id: &OrderId, items: &[LineItem]) -> Result<InventoryReport> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        if state.fail_on_decrement {
            return Err(PaymentError::Persistence(
                "inventory store unavailable".to_string(),
            ));
        }

        let mut report = InventoryReport::default();
        for (line, item) in items.iter().enumerate() {
            let key = (order_id.clone(), line);
            let outcome = if state.applied.contains(&key) {
                StockOutcome::Decremented
            } else {
                match state.stock.get_mut(&item.product_id) {
                    None => StockOutcome::UnknownProduct,
                    Some(available) if *available < item.quantity => {
                        StockOutcome::InsufficientStock {
                            available: *available,
                        }
                    }
                    Some(available) => {
                        *available -= item.quantity;
                        state.applied.insert(key);
                        StockOutcome::Decremented
                    }
                }
            };

            report.items.push(ItemAdjustment {
                product_id: item.product_id.clone(),
                requested: item.quantity,
                outcome,
            });
        }
        Ok(report)
    }

    async fn forget(&self, order_id: &OrderId) -> Result<()> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .applied
            .retain(|(applied, _)| applied != order_id);
        Ok(())
    }
}
