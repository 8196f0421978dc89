//! HTTP API server for storefront payment finalization.
//!
//! Exposes the Kakao Pay ready endpoint, the gateway's redirect callbacks
//! and operator endpoints for degraded orders, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use common::Money;
use metrics_exporter_prometheus::PrometheusHandle;
use payment::{
    InMemoryCouponLedger, InMemoryInventory, InMemoryOrderWriter, PaymentGateway,
    PaymentOrchestrator,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::metrics::ScrapeState;
use routes::payments::AppState;

/// Longest window housekeeping accepts; larger settings are clamped.
const MAX_RETENTION_DAYS: i64 = 3650;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<G: PaymentGateway + 'static>(
    state: Arc<AppState<G>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::scrape::<G>))
        .with_state(ScrapeState {
            payments: Arc::clone(&state),
            recorder: metrics_handle,
        });

    Router::new()
        .route("/health", get(routes::health::check::<G>))
        .route("/payment/kakao/ready", post(routes::payments::ready::<G>))
        .route("/payment/qr/success", get(routes::payments::success::<G>))
        .route("/payment/qr/cancel", get(routes::payments::cancel::<G>))
        .route("/payment/qr/fail", get(routes::payments::fail::<G>))
        .route(
            "/payments/reconciliation",
            get(routes::payments::reconciliation::<G>),
        )
        .route("/payments/{order_id}", get(routes::payments::status::<G>))
        .route(
            "/payments/{order_id}/reconcile",
            post(routes::payments::reconcile::<G>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around `gateway` with in-memory order,
/// coupon and inventory stores seeded from the configuration.
pub fn create_default_state<G: PaymentGateway + 'static>(
    gateway: G,
    config: &Config,
) -> Arc<AppState<G>> {
    let orders = InMemoryOrderWriter::new();
    let coupons = InMemoryCouponLedger::new();
    let inventory = InMemoryInventory::new();

    for (product_id, count) in &config.seed_stock {
        inventory.set_stock(product_id.as_str(), *count);
    }
    for (coupon_id, discount) in &config.seed_coupons {
        coupons.issue(coupon_id.as_str(), Money::from_minor(*discount));
    }

    let orchestrator = PaymentOrchestrator::new(
        gateway,
        orders.clone(),
        coupons.clone(),
        inventory.clone(),
        config.orchestrator_config(),
    );

    Arc::new(AppState {
        orchestrator,
        orders,
        coupons,
        inventory,
        payment_result_url: config.payment_result_url.clone(),
    })
}

/// Expires stale pending intents and prunes settled records once.
///
/// Returns the number of expired intents and pruned records.
pub async fn run_housekeeping<G: PaymentGateway + 'static>(
    state: &AppState<G>,
    pending_ttl: Duration,
    settled_retention: Duration,
) -> (usize, usize) {
    let expired = state
        .orchestrator
        .expire_pending(to_window(pending_ttl))
        .await;
    let pruned = state
        .orchestrator
        .prune_settled(to_window(settled_retention))
        .await;
    (expired, pruned)
}

/// Spawns the periodic housekeeping task.
pub fn spawn_housekeeping<G: PaymentGateway + 'static>(
    state: Arc<AppState<G>>,
    config: &Config,
) -> JoinHandle<()> {
    let interval = config.housekeeping_interval.max(Duration::from_secs(1));
    let pending_ttl = config.pending_ttl;
    let settled_retention = config.settled_retention;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_housekeeping(&state, pending_ttl, settled_retention).await;
        }
    })
}

fn to_window(duration: Duration) -> chrono::Duration {
    let max = chrono::Duration::days(MAX_RETENTION_DAYS);
    chrono::Duration::from_std(duration).map_or(max, |window| window.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_window_clamps() {
        assert_eq!(to_window(Duration::from_secs(60)), chrono::Duration::seconds(60));
        assert_eq!(
            to_window(Duration::from_secs(u64::MAX)),
            chrono::Duration::days(MAX_RETENTION_DAYS)
        );
    }
}
