//! Payment orchestrator: prepare, finalize, abandon and reconcile.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use common::{Money, OrderId};

use crate::config::OrchestratorConfig;
use crate::error::{PaymentError, Result};
use crate::gateway::{GatewayError, PaymentGateway};
use crate::intent::{ApprovalResult, OrderRecord, PaymentIntent, PaymentRequest, PreparedPayment};
use crate::ledger::{PaymentLedger, PaymentRecord, SagaProgress, StepFailure};
use crate::outcome::{AbandonOutcome, AbandonReason, DegradedReport, FinalizeOutcome};
use crate::services::{CouponLedger, InventoryAdjuster, OrderWriter};
use crate::state::PaymentState;
use crate::steps;
use crate::store::PendingPaymentStore;

/// What the gateway said about an approval attempt.
enum ApprovalAttempt {
    Approved(ApprovalResult),
    Refused(PaymentError),
    Unknown(String),
}

/// Drives an order from intent creation through gateway approval to the
/// post-approval saga (order write, coupon consumption, stock decrement).
///
/// Admission to `finalize` is decided solely by `PendingPaymentStore::take`,
/// so a duplicated gateway callback never reaches the approve call. After a
/// successful approval nothing is rolled back: local step failures leave the
/// order in `RemoteApprovedLocalFailed`, from which `reconcile` can re-run
/// the idempotent steps.
pub struct PaymentOrchestrator<G, O, C, I>
where
    G: PaymentGateway + 'static,
    O: OrderWriter,
    C: CouponLedger,
    I: InventoryAdjuster,
{
    gateway: Arc<G>,
    orders: O,
    coupons: C,
    inventory: I,
    store: PendingPaymentStore,
    ledger: PaymentLedger,
    config: OrchestratorConfig,
}

impl<G, O, C, I> PaymentOrchestrator<G, O, C, I>
where
    G: PaymentGateway + 'static,
    O: OrderWriter,
    C: CouponLedger,
    I: InventoryAdjuster,
{
    /// Creates a new orchestrator with empty pending store and ledger.
    pub fn new(gateway: G, orders: O, coupons: C, inventory: I, config: OrchestratorConfig) -> Self {
        Self {
            gateway: Arc::new(gateway),
            orders,
            coupons,
            inventory,
            store: PendingPaymentStore::new(),
            ledger: PaymentLedger::new(),
            config,
        }
    }

    /// Returns the pending intent store.
    pub fn store(&self) -> &PendingPaymentStore {
        &self.store
    }

    /// Returns the payment ledger.
    pub fn ledger(&self) -> &PaymentLedger {
        &self.ledger
    }

    /// Builds an intent, registers it with the gateway and keeps it pending
    /// until the gateway calls back.
    #[tracing::instrument(skip_all, fields(buyer_id = %request.buyer_id))]
    pub async fn prepare(&self, request: PaymentRequest) -> Result<PreparedPayment> {
        let discount = match &request.coupon_id {
            Some(coupon_id) => self.coupons.quote(coupon_id).await?,
            None => Money::zero(),
        };

        let order_id = OrderId::generate();
        let intent = PaymentIntent::from_request(order_id.clone(), request, discount)?;

        let handle = self.gateway.create_intent(&intent).await.map_err(|e| {
            tracing::warn!(%order_id, error = %e, "gateway refused payment intent");
            PaymentError::from(e)
        })?;
        let intent = intent.with_gateway_reference(handle.transaction_ref.clone());

        if let Err(e) = self.store.register(intent.clone()).await {
            tracing::error!(%order_id, error = %e, "order id collision on intent registration");
            return Err(e);
        }
        self.ledger.open(&intent).await;

        metrics::counter!("payment_prepared_total").increment(1);
        tracing::info!(%order_id, total = %intent.total_amount, "payment intent pending");

        Ok(PreparedPayment { order_id, handle })
    }

    /// Finalizes a payment from the gateway's success callback.
    ///
    /// Returns `Err(Absent)` without contacting the gateway when the order
    /// is not pending. Approval failures are returned as errors and leave
    /// the order in `PaymentFailed`; the buyer has to prepare again.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn finalize(&self, order_id: &OrderId, proof: &str) -> Result<FinalizeOutcome> {
        let started = Instant::now();

        let Some(intent) = self.store.take(order_id).await else {
            tracing::info!("finalize for unknown or already processed order");
            metrics::counter!("payment_finalize_total", "outcome" => "conflict").increment(1);
            return Err(PaymentError::Absent(order_id.clone()));
        };

        self.ledger.begin_approval(&intent).await;

        let result = match self.approve(&intent, proof).await {
            ApprovalAttempt::Approved(approval) => {
                self.apply_approval(&intent, approval, None).await
            }
            ApprovalAttempt::Refused(err) => Err(self.refuse(order_id, err).await),
            ApprovalAttempt::Unknown(reason) => Ok(self.approval_unknown(order_id, reason).await),
        };

        metrics::histogram!("payment_finalize_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Handles the gateway's cancel and fail callbacks.
    ///
    /// Safe to call at any time: if the intent is no longer pending the
    /// call is a no-op that still echoes the status.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, reason = %reason))]
    pub async fn abandon(&self, order_id: &OrderId, reason: AbandonReason) -> AbandonOutcome {
        let released = self.store.take(order_id).await.is_some();
        if released {
            self.ledger
                .close_pending(order_id, PaymentState::Abandoned)
                .await;
            metrics::counter!("payment_abandoned_total", "reason" => reason.as_str()).increment(1);
            tracing::info!("pending payment abandoned");
        } else {
            tracing::debug!("abandon for order with no pending intent");
        }

        AbandonOutcome {
            order_id: order_id.clone(),
            reason,
            released,
        }
    }

    /// Re-runs the post-approval saga for a degraded order.
    ///
    /// Orders whose approval outcome was unknown are first checked against
    /// the gateway; if it holds no charge the order becomes `PaymentFailed`.
    /// An order that already reached the order store is reused, so a write
    /// that landed after its step timed out is not repeated.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn reconcile(&self, order_id: &OrderId) -> Result<FinalizeOutcome> {
        let record = self.ledger.claim_for_reconciliation(order_id).await?;
        let intent = record.intent.ok_or_else(|| PaymentError::NotReconcilable {
            order_id: order_id.clone(),
            state: record.state,
        })?;
        tracing::info!(attempts = record.attempts, "reconciling payment");

        let approval = match record.approval {
            Some(approval) => approval,
            None => match self.lookup(&intent).await {
                Ok(Some(approval)) => approval,
                Ok(None) => {
                    let err = PaymentError::ApprovalRejected(
                        "gateway holds no approved charge".to_string(),
                    );
                    return Err(self.refuse(order_id, err).await);
                }
                Err(e) => {
                    return Ok(self.approval_unknown(order_id, e.to_string()).await);
                }
            },
        };

        // A failed lookup only means the write is attempted again.
        let committed = self
            .step(steps::STEP_COMMIT_ORDER, self.orders.find(order_id))
            .await
            .ok()
            .flatten();

        self.apply_approval(&intent, approval, committed).await
    }

    /// Returns the payment record of an order.
    pub async fn status(&self, order_id: &OrderId) -> Option<PaymentRecord> {
        self.ledger.get(order_id).await
    }

    /// Returns every order waiting for reconciliation.
    pub async fn needing_reconciliation(&self) -> Vec<PaymentRecord> {
        self.ledger.needing_reconciliation().await
    }

    /// Drops pending intents older than `max_age`. A later callback for one
    /// of them is answered as absent.
    pub async fn expire_pending(&self, max_age: chrono::Duration) -> usize {
        let expired = self.store.expire(max_age).await;
        for order_id in &expired {
            self.ledger
                .close_pending(order_id, PaymentState::Expired)
                .await;
        }
        if !expired.is_empty() {
            metrics::counter!("payment_pending_expired_total").increment(expired.len() as u64);
            tracing::info!(count = expired.len(), "expired stale payment intents");
        }
        expired.len()
    }

    /// Drops settled ledger records older than `max_age`, together with the
    /// stock idempotency keys of those orders.
    pub async fn prune_settled(&self, max_age: chrono::Duration) -> usize {
        let pruned = self.ledger.prune_settled(max_age).await;
        for order_id in &pruned {
            if let Err(e) = self.inventory.forget(order_id).await {
                tracing::warn!(%order_id, error = %e, "failed to drop stock keys of pruned order");
            }
        }
        if !pruned.is_empty() {
            tracing::debug!(count = pruned.len(), "pruned settled payment records");
        }
        pruned.len()
    }

    /// Calls the gateway approval on its own task.
    ///
    /// The task is awaited for at most `approve_timeout`; on timeout it is
    /// left running and the gateway is asked for the order status instead.
    /// An approve that fails with an unknown outcome is settled the same way.
    async fn approve(&self, intent: &PaymentIntent, proof: &str) -> ApprovalAttempt {
        let gateway = Arc::clone(&self.gateway);
        let call_intent = intent.clone();
        let proof = proof.to_string();
        let call = tokio::spawn(async move { gateway.approve(&call_intent, &proof).await });

        let ambiguous = match tokio::time::timeout(self.config.approve_timeout, call).await {
            Ok(Ok(Ok(approval))) => return ApprovalAttempt::Approved(approval),
            Ok(Ok(Err(GatewayError::OutcomeUnknown(reason)))) => reason,
            Ok(Ok(Err(err))) => return ApprovalAttempt::Refused(err.into()),
            Ok(Err(join_err)) => format!("approve task failed: {join_err}"),
            Err(_) => format!(
                "approve timed out after {}ms",
                self.config.approve_timeout.as_millis()
            ),
        };

        tracing::warn!(reason = %ambiguous, "approval outcome unknown, querying gateway");
        match self.lookup(intent).await {
            Ok(Some(approval)) => ApprovalAttempt::Approved(approval),
            Ok(None) => ApprovalAttempt::Unknown(format!(
                "{ambiguous}; gateway reports no charge yet"
            )),
            Err(e) => ApprovalAttempt::Unknown(format!("{ambiguous}; status query failed: {e}")),
        }
    }

    async fn lookup(
        &self,
        intent: &PaymentIntent,
    ) -> std::result::Result<Option<ApprovalResult>, GatewayError> {
        match tokio::time::timeout(self.config.approve_timeout, self.gateway.lookup(intent)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Unavailable("status query timed out".to_string())),
        }
    }

    /// Checks the approved amount, then runs the post-approval saga.
    async fn apply_approval(
        &self,
        intent: &PaymentIntent,
        approval: ApprovalResult,
        committed: Option<OrderRecord>,
    ) -> Result<FinalizeOutcome> {
        let order_id = &intent.order_id;
        self.ledger.record_approval(order_id, &approval).await;

        if approval.approved_amount != intent.total_amount {
            tracing::error!(
                expected = %intent.total_amount,
                approved = %approval.approved_amount,
                gateway_transaction_id = %approval.gateway_transaction_id,
                "approved amount does not match intent total"
            );
            let err = PaymentError::AmountMismatch {
                order_id: order_id.clone(),
                expected: intent.total_amount,
                approved: approval.approved_amount,
            };
            return Err(self.refuse(order_id, err).await);
        }

        Ok(self.run_local_steps(intent, approval, committed).await)
    }

    /// Runs order write, coupon consumption and stock decrement in order.
    ///
    /// A failing step does not stop the ones after it; every failure is
    /// recorded and the order ends up degraded.
    async fn run_local_steps(
        &self,
        intent: &PaymentIntent,
        approval: ApprovalResult,
        committed: Option<OrderRecord>,
    ) -> FinalizeOutcome {
        let order_id = &intent.order_id;
        let mut progress = SagaProgress::default();

        let commit = match committed {
            Some(order) => {
                tracing::debug!("order already committed, skipping write");
                Ok(order)
            }
            None => {
                self.step(steps::STEP_COMMIT_ORDER, self.orders.commit(&approval, intent))
                    .await
            }
        };
        match commit {
            Ok(order) => {
                progress.order = Some(order);
                progress.completed_steps.push(steps::STEP_COMMIT_ORDER.to_string());
            }
            Err(e) => progress
                .failures
                .push(StepFailure::new(steps::STEP_COMMIT_ORDER, &e)),
        }

        if let Some(coupon_id) = &intent.coupon_id {
            match self
                .step(steps::STEP_CONSUME_COUPON, self.coupons.consume(coupon_id))
                .await
            {
                Ok(()) => progress
                    .completed_steps
                    .push(steps::STEP_CONSUME_COUPON.to_string()),
                Err(e) => progress
                    .failures
                    .push(StepFailure::new(steps::STEP_CONSUME_COUPON, &e)),
            }
        }

        match self
            .step(
                steps::STEP_DECREMENT_INVENTORY,
                self.inventory.decrement(order_id, &intent.line_items),
            )
            .await
        {
            Ok(report) => {
                if report.all_decremented() {
                    progress
                        .completed_steps
                        .push(steps::STEP_DECREMENT_INVENTORY.to_string());
                } else {
                    let err = PaymentError::InsufficientStock(report.shortfalls());
                    tracing::error!(
                        step = steps::STEP_DECREMENT_INVENTORY,
                        error = %err,
                        "post-approval step failed"
                    );
                    progress
                        .failures
                        .push(StepFailure::new(steps::STEP_DECREMENT_INVENTORY, &err));
                }
                progress.inventory = Some(report);
            }
            Err(e) => progress
                .failures
                .push(StepFailure::new(steps::STEP_DECREMENT_INVENTORY, &e)),
        }

        match (progress.failures.is_empty(), progress.order.clone()) {
            (true, Some(order)) => {
                self.ledger
                    .settle(order_id, PaymentState::Finalized, progress)
                    .await;
                metrics::counter!("payment_finalize_total", "outcome" => "completed").increment(1);
                tracing::info!(
                    gateway_transaction_id = %approval.gateway_transaction_id,
                    "payment finalized"
                );
                FinalizeOutcome::Completed { order }
            }
            _ => {
                let report = DegradedReport {
                    order_id: order_id.clone(),
                    approval,
                    order: progress.order.clone(),
                    failures: progress.failures.clone(),
                };
                self.ledger
                    .settle(order_id, PaymentState::RemoteApprovedLocalFailed, progress)
                    .await;
                metrics::counter!("payment_finalize_total", "outcome" => "degraded").increment(1);
                metrics::counter!("payment_degraded_total").increment(1);
                tracing::warn!(
                    failed_steps = report.failures.len(),
                    "payment approved but local steps failed, order needs reconciliation"
                );
                FinalizeOutcome::Degraded(report)
            }
        }
    }

    /// Runs one post-approval step under the step timeout.
    async fn step<T>(&self, name: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let result = match tokio::time::timeout(self.config.step_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::StepTimedOut {
                step: name.to_string(),
                timeout_ms: u64::try_from(self.config.step_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            }),
        };
        if let Err(e) = &result {
            tracing::error!(step = name, error = %e, "post-approval step failed");
        }
        result
    }

    async fn refuse(&self, order_id: &OrderId, err: PaymentError) -> PaymentError {
        self.ledger
            .fail_approval(
                order_id,
                PaymentState::PaymentFailed,
                StepFailure::new(steps::STEP_APPROVE, &err),
            )
            .await;
        metrics::counter!("payment_finalize_total", "outcome" => "failed").increment(1);
        tracing::warn!(error = %err, "payment not approved");
        err
    }

    async fn approval_unknown(&self, order_id: &OrderId, reason: String) -> FinalizeOutcome {
        let err = PaymentError::GatewayUnavailable(reason);
        self.ledger
            .fail_approval(
                order_id,
                PaymentState::ApprovalUnknown,
                StepFailure::new(steps::STEP_APPROVE, &err),
            )
            .await;
        metrics::counter!("payment_finalize_total", "outcome" => "unknown").increment(1);
        tracing::warn!(error = %err, "approval outcome unknown, order needs reconciliation");
        FinalizeOutcome::ApprovalPending {
            order_id: order_id.clone(),
        }
    }
}
