//! Payment intents, gateway approvals and finalized order records.

use chrono::{DateTime, Utc};
use common::{BuyerId, CouponId, LineItem, Money, OrderId};
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};

/// A buyer's declared purchase, as received by `prepare`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub buyer_id: BuyerId,
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub coupon_id: Option<CouponId>,
}

impl PaymentRequest {
    /// Creates a request without a coupon.
    pub fn new(buyer_id: impl Into<BuyerId>, line_items: Vec<LineItem>) -> Self {
        Self {
            buyer_id: buyer_id.into(),
            line_items,
            coupon_id: None,
        }
    }

    /// Attaches a coupon to the request.
    pub fn with_coupon(mut self, coupon_id: impl Into<CouponId>) -> Self {
        self.coupon_id = Some(coupon_id.into());
        self
    }

    /// Checks the line items and returns their summed subtotal.
    pub fn subtotal(&self) -> Result<Money> {
        if self.line_items.is_empty() {
            return Err(PaymentError::InvalidRequest(
                "at least one line item is required".to_string(),
            ));
        }

        let mut total = Money::zero();
        for item in &self.line_items {
            if item.quantity == 0 {
                return Err(PaymentError::InvalidRequest(format!(
                    "quantity for product {} must be positive",
                    item.product_id
                )));
            }
            if item.unit_price.is_negative() {
                return Err(PaymentError::InvalidRequest(format!(
                    "unit price for product {} must not be negative",
                    item.product_id
                )));
            }
            total = item
                .subtotal()
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or_else(|| PaymentError::InvalidRequest("order total overflows".to_string()))?;
        }
        Ok(total)
    }
}

/// A purchase registered with the gateway but not yet approved.
///
/// Intents are built once by the orchestrator and never mutated after
/// registration; `finalize` reads one exactly once and discards it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    pub line_items: Vec<LineItem>,
    pub coupon_id: Option<CouponId>,
    /// Line item subtotals minus the coupon discount.
    pub total_amount: Money,
    /// The gateway's transaction reference, set once the gateway accepted
    /// the intent.
    pub gateway_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Builds an intent from a validated request.
    ///
    /// `discount` is the coupon discount quoted at creation time. A discount
    /// that brings the total to zero or below is rejected; the gateway cannot
    /// charge a non-positive amount.
    pub fn from_request(order_id: OrderId, request: PaymentRequest, discount: Money) -> Result<Self> {
        let subtotal = request.subtotal()?;
        let total_amount = subtotal
            .checked_sub(discount)
            .filter(Money::is_positive)
            .ok_or_else(|| {
                PaymentError::InvalidRequest(format!(
                    "discount {discount} leaves nothing to charge on subtotal {subtotal}"
                ))
            })?;

        Ok(Self {
            order_id,
            buyer_id: request.buyer_id,
            line_items: request.line_items,
            coupon_id: request.coupon_id,
            total_amount,
            gateway_reference: None,
            created_at: Utc::now(),
        })
    }

    /// Returns the intent with the gateway transaction reference attached.
    pub fn with_gateway_reference(mut self, reference: impl Into<String>) -> Self {
        self.gateway_reference = Some(reference.into());
        self
    }

    /// Total number of units across all line items.
    pub fn total_quantity(&self) -> u32 {
        self.line_items
            .iter()
            .fold(0u32, |acc, item| acc.saturating_add(item.quantity))
    }
}

/// Where the client goes to complete the payment on the gateway's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayIntentHandle {
    /// Gateway transaction id; needed again for approval.
    pub transaction_ref: String,
    pub redirect_pc_url: String,
    pub redirect_mobile_url: String,
    pub redirect_app_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful `prepare`.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedPayment {
    pub order_id: OrderId,
    pub handle: GatewayIntentHandle,
}

/// The gateway's answer to a successful approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub order_id: OrderId,
    pub gateway_transaction_id: String,
    pub approved_amount: Money,
    pub approved_at: DateTime<Utc>,
}

/// Status of a finalized order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Completed,
}

/// Durable record of a successfully paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub gateway_transaction_id: String,
    pub buyer_id: BuyerId,
    pub line_items: Vec<LineItem>,
    pub coupon_id: Option<CouponId>,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub finalized_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Builds the record written for an approved intent.
    pub fn completed(approval: &ApprovalResult, intent: &PaymentIntent) -> Self {
        Self {
            order_id: intent.order_id.clone(),
            gateway_transaction_id: approval.gateway_transaction_id.clone(),
            buyer_id: intent.buyer_id.clone(),
            line_items: intent.line_items.clone(),
            coupon_id: intent.coupon_id.clone(),
            total_amount: intent.total_amount,
            status: OrderStatus::Completed,
            finalized_at: Utc::now(),
        }
    }
}
