//! Prometheus scrape endpoint.
//!
//! Counters and histograms are recorded as payments move through the
//! orchestrator. The size of the in-memory payment state has no event of its
//! own, so it is sampled into gauges on every scrape.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::PrometheusHandle;
use payment::PaymentGateway;
use serde::Serialize;

use super::payments::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// State of the scrape route: the payment state to sample and the recorder
/// that renders the exposition.
pub struct ScrapeState<G: PaymentGateway + 'static> {
    pub payments: Arc<AppState<G>>,
    pub recorder: PrometheusHandle,
}

impl<G: PaymentGateway + 'static> Clone for ScrapeState<G> {
    fn clone(&self) -> Self {
        Self {
            payments: Arc::clone(&self.payments),
            recorder: self.recorder.clone(),
        }
    }
}

/// Point-in-time size of the in-memory payment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentBacklog {
    pub pending_payments: usize,
    pub awaiting_reconciliation: usize,
    pub ledger_records: usize,
}

/// Reads the backlog and publishes it as gauges.
pub async fn sample_backlog<G: PaymentGateway + 'static>(state: &AppState<G>) -> PaymentBacklog {
    let orchestrator = &state.orchestrator;
    let backlog = PaymentBacklog {
        pending_payments: orchestrator.store().len().await,
        awaiting_reconciliation: orchestrator.needing_reconciliation().await.len(),
        ledger_records: orchestrator.ledger().len().await,
    };

    metrics::gauge!("payment_pending_intents").set(backlog.pending_payments as f64);
    metrics::gauge!("payment_awaiting_reconciliation").set(backlog.awaiting_reconciliation as f64);
    metrics::gauge!("payment_ledger_records").set(backlog.ledger_records as f64);
    backlog
}

/// GET /metrics: payment metrics in Prometheus text format.
pub async fn scrape<G: PaymentGateway + 'static>(
    State(state): State<ScrapeState<G>>,
) -> Response {
    let backlog = sample_backlog(&state.payments).await;
    tracing::trace!(?backlog, "sampled payment backlog");

    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.recorder.render(),
    )
        .into_response()
}
