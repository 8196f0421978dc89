//! Observable per-order payment state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{BuyerId, Money, OrderId};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{PaymentError, Result};
use crate::intent::{ApprovalResult, OrderRecord, PaymentIntent};
use crate::services::InventoryReport;
use crate::state::PaymentState;

/// A failed step, kept on the record for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

impl StepFailure {
    pub fn new(step: &str, error: &PaymentError) -> Self {
        Self {
            step: step.to_string(),
            error: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Everything known about one order's payment.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRecord {
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    pub total_amount: Money,
    pub state: PaymentState,
    /// Kept only while the post-approval saga may still need to run.
    pub intent: Option<PaymentIntent>,
    pub approval: Option<ApprovalResult>,
    pub order: Option<OrderRecord>,
    pub inventory: Option<InventoryReport>,
    pub completed_steps: Vec<String>,
    pub failures: Vec<StepFailure>,
    /// Number of post-approval runs, including reconciliations.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    fn pending(intent: &PaymentIntent) -> Self {
        let now = Utc::now();
        Self {
            order_id: intent.order_id.clone(),
            buyer_id: intent.buyer_id.clone(),
            total_amount: intent.total_amount,
            state: PaymentState::Pending,
            intent: None,
            approval: None,
            order: None,
            inventory: None,
            completed_steps: Vec::new(),
            failures: Vec::new(),
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn set_state(&mut self, state: PaymentState) {
        self.state = state;
        self.updated_at = Utc::now();
        if matches!(
            state,
            PaymentState::Finalized | PaymentState::PaymentFailed
        ) {
            self.intent = None;
        }
    }
}

/// Result of one post-approval run, written to the record in one go.
#[derive(Debug, Clone, Default)]
pub struct SagaProgress {
    pub order: Option<OrderRecord>,
    pub inventory: Option<InventoryReport>,
    pub completed_steps: Vec<String>,
    pub failures: Vec<StepFailure>,
}

/// Concurrency-safe registry of payment records keyed by order id.
#[derive(Debug, Clone, Default)]
pub struct PaymentLedger {
    records: Arc<RwLock<HashMap<OrderId, PaymentRecord>>>,
}

impl PaymentLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a `Pending` record for a freshly registered intent. An
    /// existing record is left untouched.
    pub async fn open(&self, intent: &PaymentIntent) {
        self.records
            .write()
            .await
            .entry(intent.order_id.clone())
            .or_insert_with(|| PaymentRecord::pending(intent));
    }

    /// Moves an order to `Approving` and keeps its intent for resumption.
    pub async fn begin_approval(&self, intent: &PaymentIntent) {
        let mut records = self.records.write().await;
        let record = records
            .entry(intent.order_id.clone())
            .or_insert_with(|| PaymentRecord::pending(intent));
        record.intent = Some(intent.clone());
        record.set_state(PaymentState::Approving);
    }

    /// Stores the gateway approval on the record.
    pub async fn record_approval(&self, order_id: &OrderId, approval: &ApprovalResult) {
        if let Some(record) = self.records.write().await.get_mut(order_id) {
            record.approval = Some(approval.clone());
            record.updated_at = Utc::now();
        }
    }

    /// Moves an order to a terminal approval failure or unknown outcome.
    pub async fn fail_approval(&self, order_id: &OrderId, state: PaymentState, failure: StepFailure) {
        if let Some(record) = self.records.write().await.get_mut(order_id) {
            record.failures.push(failure);
            record.set_state(state);
        }
    }

    /// Writes the result of a post-approval run and its resulting state.
    pub async fn settle(&self, order_id: &OrderId, state: PaymentState, progress: SagaProgress) {
        if let Some(record) = self.records.write().await.get_mut(order_id) {
            record.attempts += 1;
            if progress.order.is_some() {
                record.order = progress.order;
            }
            if progress.inventory.is_some() {
                record.inventory = progress.inventory;
            }
            record.completed_steps = progress.completed_steps;
            record.failures = progress.failures;
            record.set_state(state);
        }
    }

    /// Moves a `Pending` order to `state` (abandoned or expired). Orders in
    /// any other state are left as they are.
    pub async fn close_pending(&self, order_id: &OrderId, state: PaymentState) {
        if let Some(record) = self.records.write().await.get_mut(order_id)
            && record.state == PaymentState::Pending
        {
            record.set_state(state);
        }
    }

    /// Atomically claims a degraded order for reconciliation.
    ///
    /// Only one caller can claim an order; the claim moves it to
    /// `Reconciling` until the run settles it again.
    pub async fn claim_for_reconciliation(&self, order_id: &OrderId) -> Result<PaymentRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(order_id)
            .ok_or_else(|| PaymentError::NotFound(order_id.clone()))?;

        if !record.state.needs_reconciliation() || record.intent.is_none() {
            return Err(PaymentError::NotReconcilable {
                order_id: order_id.clone(),
                state: record.state,
            });
        }

        record.set_state(PaymentState::Reconciling);
        Ok(record.clone())
    }

    /// Returns the record for an order.
    pub async fn get(&self, order_id: &OrderId) -> Option<PaymentRecord> {
        self.records.read().await.get(order_id).cloned()
    }

    /// Returns every record in a degraded state, oldest update first.
    pub async fn needing_reconciliation(&self) -> Vec<PaymentRecord> {
        let mut degraded: Vec<PaymentRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.state.needs_reconciliation())
            .cloned()
            .collect();
        degraded.sort_by_key(|r| r.updated_at);
        degraded
    }

    /// Drops settled records last updated more than `max_age` ago and
    /// returns their order ids.
    pub async fn prune_settled(&self, max_age: Duration) -> Vec<OrderId> {
        let cutoff = Utc::now() - max_age;
        let mut records = self.records.write().await;
        let mut pruned = Vec::new();
        records.retain(|order_id, r| {
            let stale = r.state.is_settled() && r.updated_at < cutoff;
            if stale {
                pruned.push(order_id.clone());
            }
            !stale
        });
        pruned
    }

    /// Returns the number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if the ledger holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
