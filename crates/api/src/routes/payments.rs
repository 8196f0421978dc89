//! Payment preparation, gateway callbacks and reconciliation endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::{LineItem, Money, OrderId};
use payment::{
    AbandonOutcome, AbandonReason, FinalizeOutcome, InMemoryCouponLedger, InMemoryInventory,
    InMemoryOrderWriter, PaymentGateway, PaymentOrchestrator, PaymentRecord,
    PaymentRequest,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;

/// Orchestrator wired to the in-memory local stores.
pub type Orchestrator<G> =
    PaymentOrchestrator<G, InMemoryOrderWriter, InMemoryCouponLedger, InMemoryInventory>;

/// Shared application state accessible from all handlers.
pub struct AppState<G: PaymentGateway + 'static> {
    pub orchestrator: Orchestrator<G>,
    pub orders: InMemoryOrderWriter,
    pub coupons: InMemoryCouponLedger,
    pub inventory: InMemoryInventory,
    /// Storefront page the buyer lands on after the success callback.
    pub payment_result_url: String,
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ReadyRequest {
    pub buyer_id: String,
    pub items: Vec<ReadyItemRequest>,
    #[serde(default)]
    pub coupon_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReadyItemRequest {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: i64,
}

/// Query string of the gateway's success redirect.
#[derive(Debug, Deserialize)]
pub struct SuccessParams {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub pg_token: String,
}

/// Query string of the gateway's cancel and fail redirects.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(rename = "orderId")]
    pub order_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReadyResponse {
    pub order_id: String,
    pub tid: String,
    pub next_redirect_pc_url: String,
    pub next_redirect_mobile_url: String,
    pub next_redirect_app_url: Option<String>,
}

#[derive(Serialize)]
pub struct CallbackResponse {
    pub status: &'static str,
    #[serde(rename = "orderId")]
    pub order_id: String,
}

impl From<AbandonOutcome> for CallbackResponse {
    fn from(outcome: AbandonOutcome) -> Self {
        Self {
            status: outcome.reason.as_str(),
            order_id: outcome.order_id.to_string(),
        }
    }
}

impl From<ReadyRequest> for PaymentRequest {
    fn from(req: ReadyRequest) -> Self {
        let items = req
            .items
            .into_iter()
            .map(|item| {
                LineItem::new(
                    item.product_id,
                    item.product_name,
                    item.quantity,
                    Money::from_minor(item.unit_price),
                )
            })
            .collect();
        let request = PaymentRequest::new(req.buyer_id, items);
        match req.coupon_id {
            Some(coupon_id) => request.with_coupon(coupon_id),
            None => request,
        }
    }
}

// -- Handlers --

/// POST /payment/kakao/ready: register a purchase with the gateway.
#[tracing::instrument(skip(state, req), fields(buyer_id = %req.buyer_id))]
pub async fn ready<G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Json(req): Json<ReadyRequest>,
) -> Result<Json<ReadyResponse>, ApiError> {
    if req.buyer_id.trim().is_empty() {
        return Err(ApiError::BadRequest("buyer_id is required".to_string()));
    }

    let prepared = state.orchestrator.prepare(req.into()).await?;

    Ok(Json(ReadyResponse {
        order_id: prepared.order_id.to_string(),
        tid: prepared.handle.transaction_ref,
        next_redirect_pc_url: prepared.handle.redirect_pc_url,
        next_redirect_mobile_url: prepared.handle.redirect_mobile_url,
        next_redirect_app_url: prepared.handle.redirect_app_url,
    }))
}

/// GET /payment/qr/success: finalize the payment and redirect the buyer to
/// the result page.
///
/// Only `orderId` and `pg_token` are read; no session state is involved.
#[tracing::instrument(skip(state, params), fields(order_id = %params.order_id))]
pub async fn success<G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Query(params): Query<SuccessParams>,
) -> Result<Response, ApiError> {
    let order_id = OrderId::new(params.order_id);

    let status = match state.orchestrator.finalize(&order_id, &params.pg_token).await {
        Ok(FinalizeOutcome::Completed { .. } | FinalizeOutcome::Degraded(_)) => "success",
        Ok(FinalizeOutcome::ApprovalPending { .. }) => "pending",
        Err(err) if err.is_payment_failure() => "fail",
        Err(err) => return Err(err.into()),
    };

    Ok(result_redirect(&state.payment_result_url, &order_id, status))
}

/// GET /payment/qr/cancel: the buyer cancelled on the gateway page.
#[tracing::instrument(skip(state))]
pub async fn cancel<G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Query(params): Query<CallbackParams>,
) -> Json<CallbackResponse> {
    let order_id = OrderId::new(params.order_id);
    let outcome = state
        .orchestrator
        .abandon(&order_id, AbandonReason::Cancelled)
        .await;
    Json(outcome.into())
}

/// GET /payment/qr/fail: the gateway reported a failed payment.
#[tracing::instrument(skip(state))]
pub async fn fail<G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Query(params): Query<CallbackParams>,
) -> Json<CallbackResponse> {
    let order_id = OrderId::new(params.order_id);
    let outcome = state
        .orchestrator
        .abandon(&order_id, AbandonReason::Failed)
        .await;
    Json(outcome.into())
}

/// GET /payments/{order_id}: payment record of an order.
#[tracing::instrument(skip(state))]
pub async fn status<G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentRecord>, ApiError> {
    state
        .orchestrator
        .status(&OrderId::new(id.as_str()))
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Payment for order {id} not found")))
}

/// GET /payments/reconciliation: orders charged at the gateway whose local
/// effects are incomplete or whose approval outcome is unknown.
#[tracing::instrument(skip(state))]
pub async fn reconciliation<G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
) -> Json<Vec<PaymentRecord>> {
    Json(state.orchestrator.needing_reconciliation().await)
}

/// POST /payments/{order_id}/reconcile: re-run the local steps of a
/// degraded order.
#[tracing::instrument(skip(state))]
pub async fn reconcile<G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Path(id): Path<String>,
) -> Result<Json<FinalizeOutcome>, ApiError> {
    let outcome = state.orchestrator.reconcile(&OrderId::new(id)).await?;
    Ok(Json(outcome))
}

fn result_redirect(result_url: &str, order_id: &OrderId, status: &str) -> Response {
    let separator = if result_url.contains('?') { '&' } else { '?' };
    let location = format!("{result_url}{separator}orderId={order_id}&status={status}");
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}
