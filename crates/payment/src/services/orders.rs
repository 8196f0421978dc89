//! Order writer trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::OrderId;

use crate::error::{PaymentError, Result};
use crate::intent::{ApprovalResult, OrderRecord, PaymentIntent};

/// Persists finalized orders.
#[async_trait]
pub trait OrderWriter: Send + Sync {
    /// Writes the order record for an approved intent.
    ///
    /// Upsert by order id: a second commit for the same order returns the
    /// existing record and never creates another one.
    async fn commit(&self, approval: &ApprovalResult, intent: &PaymentIntent) -> Result<OrderRecord>;

    /// Loads a previously committed order.
    async fn find(&self, order_id: &OrderId) -> Result<Option<OrderRecord>>;
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<OrderId, OrderRecord>,
    commit_calls: usize,
    fail_on_commit: bool,
}

/// In-memory order store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderWriter {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderWriter {
    /// Creates a new in-memory order writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the writer to fail every commit.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_commit = fail;
    }

    /// Returns the number of stored orders.
    pub fn order_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .orders
            .len()
    }

    /// Returns how many times `commit` was called.
    pub fn commit_calls(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .commit_calls
    }
}

#[async_trait]
impl OrderWriter for InMemoryOrderWriter {
    async fn commit(&self, approval: &ApprovalResult, intent: &PaymentIntent) -> Result<OrderRecord> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.commit_calls += 1;

        if state.fail_on_commit {
            return Err(PaymentError::Persistence(
                "order store unavailable".to_string(),
            ));
        }

        let record = state
            .orders
            .entry(intent.order_id.clone())
            .or_insert_with(|| OrderRecord::completed(approval, intent));
        Ok(record.clone())
    }

    async fn find(&self, order_id: &OrderId) -> Result<Option<OrderRecord>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.orders.get(order_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::PaymentRequest;
    use chrono::Utc;
    use common::{LineItem, Money};

    fn fixture() -> (ApprovalResult, PaymentIntent) {
        let intent = PaymentIntent::from_request(
            OrderId::new("O1"),
            PaymentRequest::new(
                "B1",
                vec![LineItem::new("P1", "Candy", 2, Money::from_minor(2500))],
            ),
            Money::zero(),
        )
        .unwrap();
        let approval = ApprovalResult {
            order_id: OrderId::new("O1"),
            gateway_transaction_id: "T1".to_string(),
            approved_amount: Money::from_minor(5000),
            approved_at: Utc::now(),
        };
        (approval, intent)
    }

    #[tokio::test]
    async fn test_commit_twice_creates_one_record() {
        let writer = InMemoryOrderWriter::new();
        let (approval, intent) = fixture();

        let first = writer.commit(&approval, &intent).await.unwrap();
        let second = writer.commit(&approval, &intent).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(writer.order_count(), 1);
        assert_eq!(writer.commit_calls(), 2);
    }

    #[tokio::test]
    async fn test_fail_on_commit() {
        let writer = InMemoryOrderWriter::new();
        writer.set_fail_on_commit(true);
        let (approval, intent) = fixture();

        let result = writer.commit(&approval, &intent).await;
        assert!(matches!(result, Err(PaymentError::Persistence(_))));
        assert_eq!(writer.order_count(), 0);
    }

    #[tokio::test]
    async fn test_find() {
        let writer = InMemoryOrderWriter::new();
        let (approval, intent) = fixture();
        assert!(writer.find(&OrderId::new("O1")).await.unwrap().is_none());

        writer.commit(&approval, &intent).await.unwrap();
        let found = writer.find(&OrderId::new("O1")).await.unwrap().unwrap();
        assert_eq!(found.gateway_transaction_id, "T1");
    }
}
