//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use payment::PaymentError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Payment workflow error.
    Payment(PaymentError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Payment(err) => payment_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn payment_error_to_response(err: PaymentError) -> (StatusCode, String) {
    let status = match &err {
        PaymentError::InvalidRequest(_) | PaymentError::CouponUnavailable(_) => {
            StatusCode::BAD_REQUEST
        }
        PaymentError::Absent(_) | PaymentError::NotReconcilable { .. } => StatusCode::CONFLICT,
        PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
        PaymentError::GatewayRejected(_) => StatusCode::BAD_GATEWAY,
        PaymentError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PaymentError::ApprovalRejected(_) | PaymentError::AmountMismatch { .. } => {
            StatusCode::PAYMENT_REQUIRED
        }
        PaymentError::DuplicateOrder(_)
        | PaymentError::Persistence(_)
        | PaymentError::InsufficientStock(_)
        | PaymentError::StepTimedOut { .. } => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError::Payment(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use payment::PaymentState;

    fn status_of(err: PaymentError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_payment_error_statuses() {
        assert_eq!(
            status_of(PaymentError::Absent(OrderId::new("O1"))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(PaymentError::NotFound(OrderId::new("O1"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(PaymentError::NotReconcilable {
                order_id: OrderId::new("O1"),
                state: PaymentState::Finalized,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(PaymentError::InvalidRequest("empty".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(PaymentError::GatewayRejected("cid".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(PaymentError::GatewayUnavailable("down".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
