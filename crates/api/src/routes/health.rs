//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use payment::PaymentGateway;
use serde::Serialize;

use super::metrics::{PaymentBacklog, sample_backlog};
use super::payments::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub backlog: PaymentBacklog,
}

/// GET /health: liveness plus the size of the in-memory payment state.
pub async fn check<G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backlog: sample_backlog(&state).await,
    })
}
