//! In-memory registry of pending payment intents.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::OrderId;
use tokio::sync::RwLock;

use crate::error::{PaymentError, Result};
use crate::intent::PaymentIntent;

/// Registry mapping order ids to intents awaiting the gateway callback.
///
/// The only mutators are `register`, `take` and `expire`, each of which
/// runs inside a single write-lock critical section. `take` is the sole
/// admission control for finalize: of any number of concurrent callers for
/// one order id, exactly one receives the intent. The lock is never held
/// across gateway or persistence calls.
///
/// Nothing here survives a restart; an intent only needs to live for the
/// gateway's redirect round trip.
#[derive(Debug, Clone, Default)]
pub struct PendingPaymentStore {
    intents: Arc<RwLock<HashMap<OrderId, PaymentIntent>>>,
}

impl PendingPaymentStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an intent, failing if its order id is already pending.
    pub async fn register(&self, intent: PaymentIntent) -> Result<()> {
        let mut intents = self.intents.write().await;
        match intents.entry(intent.order_id.clone()) {
            Entry::Occupied(entry) => Err(PaymentError::DuplicateOrder(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(intent);
                Ok(())
            }
        }
    }

    /// Atomically removes and returns the intent for `order_id`.
    pub async fn take(&self, order_id: &OrderId) -> Option<PaymentIntent> {
        self.intents.write().await.remove(order_id)
    }

    /// Removes every intent older than `max_age`, returning their order ids.
    pub async fn expire(&self, max_age: Duration) -> Vec<OrderId> {
        self.expire_before(Utc::now() - max_age).await
    }

    /// Removes every intent created before `cutoff`.
    pub async fn expire_before(&self, cutoff: DateTime<Utc>) -> Vec<OrderId> {
        let mut intents = self.intents.write().await;
        let stale: Vec<OrderId> = intents
            .values()
            .filter(|intent| intent.created_at < cutoff)
            .map(|intent| intent.order_id.clone())
            .collect();
        for order_id in &stale {
            intents.remove(order_id);
        }
        stale
    }

    /// Returns the number of pending intents.
    pub async fn len(&self) -> usize {
        self.intents.read().await.len()
    }

    /// Returns true if no intents are pending.
    pub async fn is_empty(&self) -> bool {
        self.intents.read().await.is_empty()
    }

    /// Returns true if an intent is pending for `order_id`.
    pub async fn contains(&self, order_id: &OrderId) -> bool {
        self.intents.read().await.contains_key(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::PaymentRequest;
    use common::{LineItem, Money};

    fn intent(order_id: &str) -> PaymentIntent {
        let request = PaymentRequest::new(
            "B1",
            vec![LineItem::new("P1", "Candy", 1, Money::from_minor(1000))],
        );
        PaymentIntent::from_request(OrderId::new(order_id), request, Money::zero()).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_take() {
        let store = PendingPaymentStore::new();
        store.register(intent("O1")).await.unwrap();
        assert!(store.contains(&OrderId::new("O1")).await);

        let taken = store.take(&OrderId::new("O1")).await.unwrap();
        assert_eq!(taken.order_id, OrderId::new("O1"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_second_take_is_absent() {
        let store = PendingPaymentStore::new();
        store.register(intent("O1")).await.unwrap();

        assert!(store.take(&OrderId::new("O1")).await.is_some());
        assert!(store.take(&OrderId::new("O1")).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_register_fails() {
        let store = PendingPaymentStore::new();
        store.register(intent("O1")).await.unwrap();

        let result = store.register(intent("O1")).await;
        assert!(matches!(result, Err(PaymentError::DuplicateOrder(id)) if id.as_str() == "O1"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_take_has_single_winner() {
        let store = PendingPaymentStore::new();
        store.register(intent("O1")).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let store = store.clone();
            tasks.spawn(async move { store.take(&OrderId::new("O1")).await.is_some() });
        }

        let mut winners = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expire_removes_only_stale_intents() {
        let store = PendingPaymentStore::new();
        let mut old = intent("OLD");
        old.created_at = Utc::now() - Duration::minutes(45);
        store.register(old).await.unwrap();
        store.register(intent("FRESH")).await.unwrap();

        let expired = store.expire(Duration::minutes(30)).await;
        assert_eq!(expired, vec![OrderId::new("OLD")]);
        assert!(store.take(&OrderId::new("OLD")).await.is_none());
        assert!(store.contains(&OrderId::new("FRESH")).await);
    }
}
