//! Coupon ledger trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{CouponId, Money};

use crate::error::{PaymentError, Result};

/// Tracks issued coupons and their consumption.
#[async_trait]
pub trait CouponLedger: Send + Sync {
    /// Returns the discount of an issued, unconsumed coupon.
    async fn quote(&self, coupon_id: &CouponId) -> Result<Money>;

    /// Marks a coupon consumed. Consuming an already consumed coupon is a
    /// no-op.
    async fn consume(&self, coupon_id: &CouponId) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct Coupon {
    discount: Money,
    consumed: bool,
}

#[derive(Debug, Default)]
struct InMemoryCouponState {
    coupons: HashMap<CouponId, Coupon>,
    fail_on_consume: bool,
}

/// In-memory coupon ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCouponLedger {
    state: Arc<RwLock<InMemoryCouponState>>,
}

impl InMemoryCouponLedger {
    /// Creates a new in-memory coupon ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a coupon worth `discount`.
    pub fn issue(&self, coupon_id: impl Into<CouponId>, discount: Money) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .coupons
            .insert(
                coupon_id.into(),
                Coupon {
                    discount,
                    consumed: false,
                },
            );
    }

    /// Configures the ledger to fail every consume call.
    pub fn set_fail_on_consume(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_consume = fail;
    }

    /// Returns true if the coupon exists and has been consumed.
    pub fn is_consumed(&self, coupon_id: &CouponId) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .coupons
            .get(coupon_id)
            .is_some_and(|c| c.consumed)
    }
}

#[async_trait]
impl CouponLedger for InMemoryCouponLedger {
    async fn quote(&self, coupon_id: &CouponId) -> Result<Money> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match state.coupons.get(coupon_id) {
            Some(coupon) if !coupon.consumed => Ok(coupon.discount),
            _ => Err(PaymentError::CouponUnavailable(coupon_id.clone())),
        }
    }

    async fn consume(&self, coupon_id: &CouponId) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_consume {
            return Err(PaymentError::Persistence(
                "coupon store unavailable".to_string(),
            ));
        }

        let coupon = state
            .coupons
            .get_mut(coupon_id)
            .ok_or_else(|| PaymentError::Persistence(format!("unknown coupon {coupon_id}")))?;
        coupon.consumed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quote_issued_coupon() {
        let ledger = InMemoryCouponLedger::new();
        ledger.issue("C1", Money::from_minor(1000));

        let discount = ledger.quote(&CouponId::new("C1")).await.unwrap();
        assert_eq!(discount, Money::from_minor(1000));
    }

    #[tokio::test]
    async fn test_quote_unknown_coupon() {
        let ledger = InMemoryCouponLedger::new();
        let result = ledger.quote(&CouponId::new("missing")).await;
        assert!(matches!(result, Err(PaymentError::CouponUnavailable(_))));
    }

    #[tokio::test]
    async fn test_consume_is_idempotent() {
        let ledger = InMemoryCouponLedger::new();
        ledger.issue("C1", Money::from_minor(1000));
        let id = CouponId::new("C1");

        ledger.consume(&id).await.unwrap();
        ledger.consume(&id).await.unwrap();

        assert!(ledger.is_consumed(&id));
        assert!(matches!(
            ledger.quote(&id).await,
            Err(PaymentError::CouponUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_consume_unknown_coupon_fails() {
        let ledger = InMemoryCouponLedger::new();
        let result = ledger.consume(&CouponId::new("missing")).await;
        assert!(matches!(result, Err(PaymentError::Persistence(_))));
    }
}
