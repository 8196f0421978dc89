//! HTTP client for the Kakao Pay online payment API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use common::Money;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{GatewayError, PaymentGateway};
use crate::intent::{ApprovalResult, GatewayIntentHandle, PaymentIntent};

const READY_PATH: &str = "/online/v1/payment/ready";
const APPROVE_PATH: &str = "/online/v1/payment/approve";
const ORDER_PATH: &str = "/online/v1/payment/order";

/// Status reported by the order endpoint once a charge is approved.
const STATUS_SUCCESS_PAYMENT: &str = "SUCCESS_PAYMENT";

/// Connection settings for [`KakaoPayGateway`].
#[derive(Debug, Clone)]
pub struct KakaoPayConfig {
    /// API origin, e.g. `https://open-api.kakaopay.com`.
    pub base_url: String,
    /// Secret key sent as `Authorization: SECRET_KEY <key>`.
    pub secret_key: String,
    /// Merchant (affiliate) code.
    pub cid: String,
    /// Public origin of this service; the gateway redirects the buyer to
    /// the callback routes under it.
    pub callback_base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

#[derive(Serialize)]
struct ReadyRequest<'a> {
    cid: &'a str,
    partner_order_id: &'a str,
    partner_user_id: &'a str,
    item_name: String,
    quantity: u32,
    total_amount: i64,
    tax_free_amount: i64,
    approval_url: String,
    cancel_url: String,
    fail_url: String,
}

#[derive(Deserialize)]
struct ReadyResponse {
    tid: String,
    next_redirect_pc_url: String,
    next_redirect_mobile_url: String,
    #[serde(default)]
    next_redirect_app_url: Option<String>,
}

#[derive(Serialize)]
struct ApproveRequest<'a> {
    cid: &'a str,
    tid: &'a str,
    partner_order_id: &'a str,
    partner_user_id: &'a str,
    pg_token: &'a str,
}

#[derive(Deserialize)]
struct Amount {
    total: i64,
}

#[derive(Deserialize)]
struct ApproveResponse {
    tid: String,
    amount: Amount,
    #[serde(default)]
    approved_at: Option<String>,
}

#[derive(Serialize)]
struct OrderRequest<'a> {
    cid: &'a str,
    tid: &'a str,
}

#[derive(Deserialize)]
struct OrderResponse {
    tid: String,
    status: String,
    #[serde(default)]
    amount: Option<Amount>,
    #[serde(default)]
    approved_at: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error_code: Option<serde_json::Value>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Kakao Pay single-payment client.
#[derive(Debug, Clone)]
pub struct KakaoPayGateway {
    client: Client,
    config: KakaoPayConfig,
}

impl KakaoPayGateway {
    /// Creates a client with the configured request timeout.
    pub fn new(config: KakaoPayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn callback_url(&self, outcome: &str, intent: &PaymentIntent) -> String {
        format!(
            "{}/payment/qr/{}?orderId={}",
            self.config.callback_base_url.trim_end_matches('/'),
            outcome,
            intent.order_id
        )
    }

    fn authorization(&self) -> String {
        format!("SECRET_KEY {}", self.config.secret_key)
    }

    fn transaction_ref<'a>(&self, intent: &'a PaymentIntent) -> Result<&'a str, GatewayError> {
        intent.gateway_reference.as_deref().ok_or_else(|| {
            GatewayError::ApprovalRejected(format!(
                "order {} has no gateway transaction",
                intent.order_id
            ))
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, GatewayError> {
        self.send(path, body)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))
    }

    async fn send<B: Serialize>(&self, path: &str, body: &B) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(self.url(path))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(body)
            .send()
            .await
    }
}

/// Item label shown on the gateway's payment page.
fn item_name(intent: &PaymentIntent) -> String {
    match intent.line_items.as_slice() {
        [] => String::new(),
        [only] => only.product_name.clone(),
        [first, rest @ ..] => format!("{} 외 {}건", first.product_name, rest.len()),
    }
}

/// Turns a non-success response into a gateway error.
///
/// Server errors are transient; client errors are classified by the
/// caller-supplied constructor.
async fn failure(
    response: reqwest::Response,
    client_error: fn(String) -> GatewayError,
) -> GatewayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(ErrorResponse {
            error_code,
            error_message,
        }) if error_code.is_some() || error_message.is_some() => format!(
            "HTTP {status}: {} {}",
            error_code.map(|c| c.to_string()).unwrap_or_default(),
            error_message.unwrap_or_default()
        ),
        _ => format!("HTTP {status}"),
    };

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::Unavailable(detail)
    } else {
        client_error(detail)
    }
}

/// Classifies a failed approve request.
///
/// Only a failed connect proves the request never reached the gateway.
/// Timeouts, resets and body errors happen after the request may have been
/// processed.
fn approve_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_connect() && !err.is_timeout() {
        GatewayError::Unavailable(err.to_string())
    } else {
        GatewayError::OutcomeUnknown(err.to_string())
    }
}

/// Parses the gateway's local (KST) timestamp.
fn parse_kst(value: &str) -> Option<DateTime<Utc>> {
    let kst = FixedOffset::east_opt(9 * 3600)?;
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").ok()?;
    kst.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The charge already happened when this runs, so an unreadable timestamp
/// falls back to the local clock instead of failing the approval.
fn approved_at(value: Option<&str>) -> DateTime<Utc> {
    match value.and_then(parse_kst) {
        Some(at) => at,
        None => {
            tracing::warn!(approved_at = ?value, "unparseable approval timestamp, using local time");
            Utc::now()
        }
    }
}

#[async_trait]
impl PaymentGateway for KakaoPayGateway {
    #[tracing::instrument(skip(self, intent), fields(order_id = %intent.order_id))]
    async fn create_intent(
        &self,
        intent: &PaymentIntent,
    ) -> Result<GatewayIntentHandle, GatewayError> {
        let request = ReadyRequest {
            cid: &self.config.cid,
            partner_order_id: intent.order_id.as_str(),
            partner_user_id: intent.buyer_id.as_str(),
            item_name: item_name(intent),
            quantity: intent.total_quantity(),
            total_amount: intent.total_amount.minor_units(),
            tax_free_amount: 0,
            approval_url: self.callback_url("success", intent),
            cancel_url: self.callback_url("cancel", intent),
            fail_url: self.callback_url("fail", intent),
        };

        let response = self.post(READY_PATH, &request).await?;
        if !response.status().is_success() {
            return Err(failure(response, GatewayError::Rejected).await);
        }

        let body: ReadyResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        Ok(GatewayIntentHandle {
            transaction_ref: body.tid,
            redirect_pc_url: body.next_redirect_pc_url,
            redirect_mobile_url: body.next_redirect_mobile_url,
            redirect_app_url: body.next_redirect_app_url,
            created_at: Utc::now(),
        })
    }

    #[tracing::instrument(skip(self, intent, proof), fields(order_id = %intent.order_id))]
    async fn approve(
        &self,
        intent: &PaymentIntent,
        proof: &str,
    ) -> Result<ApprovalResult, GatewayError> {
        let request = ApproveRequest {
            cid: &self.config.cid,
            tid: self.transaction_ref(intent)?,
            partner_order_id: intent.order_id.as_str(),
            partner_user_id: intent.buyer_id.as_str(),
            pg_token: proof,
        };

        let response = self
            .send(APPROVE_PATH, &request)
            .await
            .map_err(approve_transport_error)?;
        if !response.status().is_success() {
            return Err(failure(response, GatewayError::ApprovalRejected).await);
        }

        // A 2xx means the gateway accepted the charge, so an unreadable body
        // leaves the outcome open rather than failed.
        let body: ApproveResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::OutcomeUnknown(e.to_string()))?;

        Ok(ApprovalResult {
            order_id: intent.order_id.clone(),
            gateway_transaction_id: body.tid,
            approved_amount: Money::from_minor(body.amount.total),
            approved_at: approved_at(body.approved_at.as_deref()),
        })
    }

    #[tracing::instrument(skip(self, intent), fields(order_id = %intent.order_id))]
    async fn lookup(&self, intent: &PaymentIntent) -> Result<Option<ApprovalResult>, GatewayError> {
        let request = OrderRequest {
            cid: &self.config.cid,
            tid: self.transaction_ref(intent)?,
        };

        let response = self.post(ORDER_PATH, &request).await?;
        if !response.status().is_success() {
            return Err(failure(response, GatewayError::Unavailable).await);
        }

        let body: OrderResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        if body.status != STATUS_SUCCESS_PAYMENT {
            tracing::debug!(status = %body.status, "gateway reports no approved charge");
            return Ok(None);
        }

        let amount = body
            .amount
            .ok_or_else(|| GatewayError::Malformed("approved order without amount".to_string()))?;

        Ok(Some(ApprovalResult {
            order_id: intent.order_id.clone(),
            gateway_transaction_id: body.tid,
            approved_amount: Money::from_minor(amount.total),
            approved_at: approved_at(body.approved_at.as_deref()),
        }))
    }
}
