//! In-memory sandbox gateway.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{Money, OrderId};

use super::{GatewayError, PaymentGateway};
use crate::intent::{ApprovalResult, GatewayIntentHandle, PaymentIntent};

#[derive(Debug, Default)]
struct SandboxState {
    /// Transaction reference -> (order, amount) for every created intent.
    transactions: HashMap<String, (OrderId, Money)>,
    approvals: HashMap<OrderId, ApprovalResult>,
    consumed_proofs: HashSet<String>,
    next_id: u32,
    create_calls: usize,
    approve_calls: usize,
    lookup_calls: usize,
    fail_create: Option<GatewayError>,
    fail_approve: Option<GatewayError>,
    fail_lookup: Option<GatewayError>,
    approved_amount_override: Option<Money>,
    approve_delay: Option<Duration>,
    lose_approve_response: bool,
}

/// Sandbox gateway that approves every well-formed request.
///
/// Used by tests and by the server when no gateway credentials are
/// configured. Failures, amount drift and slow approvals can be scripted.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<SandboxState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new sandbox gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every `create_intent` call fail with `error`.
    pub fn set_fail_create(&self, error: Option<GatewayError>) {
        self.lock().fail_create = error;
    }

    /// Makes every `approve` call fail with `error`.
    pub fn set_fail_approve(&self, error: Option<GatewayError>) {
        self.lock().fail_approve = error;
    }

    /// Makes every `lookup` call fail with `error`.
    pub fn set_fail_lookup(&self, error: Option<GatewayError>) {
        self.lock().fail_lookup = error;
    }

    /// Reports `amount` as the approved amount regardless of the intent.
    pub fn set_approved_amount(&self, amount: Option<Money>) {
        self.lock().approved_amount_override = amount;
    }

    /// Delays the approve response. The charge is recorded before the
    /// delay, like a gateway that settled but answers slowly.
    pub fn set_approve_delay(&self, delay: Option<Duration>) {
        self.lock().approve_delay = delay;
    }

    /// Records the charge but answers approve with an unknown outcome, like
    /// a gateway whose response was lost on the way back.
    pub fn set_lose_approve_response(&self, lose: bool) {
        self.lock().lose_approve_response = lose;
    }

    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    pub fn approve_calls(&self) -> usize {
        self.lock().approve_calls
    }

    pub fn lookup_calls(&self) -> usize {
        self.lock().lookup_calls
    }

    /// Returns the number of charges the sandbox has approved.
    pub fn approval_count(&self) -> usize {
        self.lock().approvals.len()
    }

    fn settle(
        &self,
        intent: &PaymentIntent,
        proof: &str,
    ) -> Result<ApprovalResult, GatewayError> {
        let mut state = self.lock();

        if let Some(err) = state.fail_approve.clone() {
            return Err(err);
        }
        if state.consumed_proofs.contains(proof) {
            return Err(GatewayError::ApprovalRejected(format!(
                "proof token {proof} already used"
            )));
        }

        let reference = intent.gateway_reference.clone().ok_or_else(|| {
            GatewayError::ApprovalRejected("intent has no gateway transaction".to_string())
        })?;
        let (order_id, amount) = state
            .transactions
            .get(&reference)
            .cloned()
            .ok_or_else(|| {
                GatewayError::ApprovalRejected(format!("unknown transaction {reference}"))
            })?;

        let approval = ApprovalResult {
            order_id: order_id.clone(),
            gateway_transaction_id: reference,
            approved_amount: state.approved_amount_override.unwrap_or(amount),
            approved_at: Utc::now(),
        };
        state.consumed_proofs.insert(proof.to_string());
        state.approvals.insert(order_id, approval.clone());
        Ok(approval)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_intent(
        &self,
        intent: &PaymentIntent,
    ) -> Result<GatewayIntentHandle, GatewayError> {
        let mut state = self.lock();
        state.create_calls += 1;

        if let Some(err) = state.fail_create.clone() {
            return Err(err);
        }

        state.next_id += 1;
        let reference = format!("T-{:04}", state.next_id);
        state.transactions.insert(
            reference.clone(),
            (intent.order_id.clone(), intent.total_amount),
        );

        Ok(GatewayIntentHandle {
            redirect_pc_url: format!("https://sandbox.pay.local/{reference}/pc"),
            redirect_mobile_url: format!("https://sandbox.pay.local/{reference}/mobile"),
            redirect_app_url: None,
            transaction_ref: reference,
            created_at: Utc::now(),
        })
    }

    async fn approve(
        &self,
        intent: &PaymentIntent,
        proof: &str,
    ) -> Result<ApprovalResult, GatewayError> {
        let (delay, lose_response) = {
            let mut state = self.lock();
            state.approve_calls += 1;
            (state.approve_delay, state.lose_approve_response)
        };

        let result = self.settle(intent, proof);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match result {
            Ok(_) if lose_response => Err(GatewayError::OutcomeUnknown(
                "connection reset after request was sent".to_string(),
            )),
            other => other,
        }
    }

    async fn lookup(&self, intent: &PaymentIntent) -> Result<Option<ApprovalResult>, GatewayError> {
        let mut state = self.lock();
        state.lookup_calls += 1;

        if let Some(err) = state.fail_lookup.clone() {
            return Err(err);
        }
        Ok(state.approvals.get(&intent.order_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::PaymentRequest;
    use common::LineItem;

    fn intent() -> PaymentIntent {
        let request = PaymentRequest::new(
            "B1",
            vec![LineItem::new("P1", "Candy", 2, Money::from_minor(2500))],
        );
        PaymentIntent::from_request(OrderId::new("O1"), request, Money::zero()).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_approve() {
        let gateway = InMemoryPaymentGateway::new();
        let intent = intent();

        let handle = gateway.create_intent(&intent).await.unwrap();
        assert_eq!(handle.transaction_ref, "T-0001");

        let intent = intent.with_gateway_reference(handle.transaction_ref);
        let approval = gateway.approve(&intent, "pg-1").await.unwrap();
        assert_eq!(approval.approved_amount, Money::from_minor(5000));
        assert_eq!(approval.order_id, OrderId::new("O1"));
        assert_eq!(gateway.approval_count(), 1);
    }

    #[tokio::test]
    async fn test_reused_proof_is_rejected() {
        let gateway = InMemoryPaymentGateway::new();
        let handle = gateway.create_intent(&intent()).await.unwrap();
        let intent = intent().with_gateway_reference(handle.transaction_ref);

        gateway.approve(&intent, "pg-1").await.unwrap();
        let second = gateway.approve(&intent, "pg-1").await;
        assert!(matches!(second, Err(GatewayError::ApprovalRejected(_))));
        assert_eq!(gateway.approve_calls(), 2);
    }

    #[tokio::test]
    async fn test_approve_without_reference_is_rejected() {
        let gateway = InMemoryPaymentGateway::new();
        let result = gateway.approve(&intent(), "pg-1").await;
        assert!(matches!(result, Err(GatewayError::ApprovalRejected(_))));
    }

    #[tokio::test]
    async fn test_lookup_reports_recorded_approval() {
        let gateway = InMemoryPaymentGateway::new();
        let handle = gateway.create_intent(&intent()).await.unwrap();
        let intent = intent().with_gateway_reference(handle.transaction_ref);

        assert!(gateway.lookup(&intent).await.unwrap().is_none());
        gateway.approve(&intent, "pg-1").await.unwrap();
        assert!(gateway.lookup(&intent).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lost_approve_response_still_records_charge() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_lose_approve_response(true);
        let handle = gateway.create_intent(&intent()).await.unwrap();
        let intent = intent().with_gateway_reference(handle.transaction_ref);

        let result = gateway.approve(&intent, "pg-1").await;
        assert!(matches!(result, Err(GatewayError::OutcomeUnknown(_))));
        assert!(gateway.lookup(&intent).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_fail_create(Some(GatewayError::Unavailable("down".to_string())));

        let result = gateway.create_intent(&intent()).await;
        assert_eq!(result, Err(GatewayError::Unavailable("down".to_string())));
        assert_eq!(gateway.create_calls(), 1);
    }
}
