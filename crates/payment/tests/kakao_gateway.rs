//! Kakao Pay client against a mock HTTP server.

use std::time::Duration;

use common::{LineItem, Money, OrderId};
use payment::{
    FinalizeOutcome, GatewayError, InMemoryCouponLedger, InMemoryInventory, InMemoryOrderWriter,
    KakaoPayConfig, KakaoPayGateway, OrchestratorConfig, PaymentGateway, PaymentIntent,
    PaymentOrchestrator, PaymentRequest, PaymentState,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "DEV-secret";

fn gateway(server: &MockServer) -> KakaoPayGateway {
    gateway_with_timeout(server, Duration::from_secs(2))
}

fn gateway_with_timeout(server: &MockServer, request_timeout: Duration) -> KakaoPayGateway {
    KakaoPayGateway::new(KakaoPayConfig {
        base_url: server.uri(),
        secret_key: SECRET.to_string(),
        cid: "TC0ONETIME".to_string(),
        callback_base_url: "http://shop.local".to_string(),
        request_timeout,
    })
    .unwrap()
}

fn intent() -> PaymentIntent {
    let request = PaymentRequest::new(
        "B1",
        vec![
            LineItem::new("P1", "Candy", 2, Money::from_minor(1500)),
            LineItem::new("P2", "Jelly", 1, Money::from_minor(2000)),
        ],
    );
    PaymentIntent::from_request(OrderId::new("O-1"), request, Money::zero()).unwrap()
}

fn registered_intent() -> PaymentIntent {
    intent().with_gateway_reference("T1234")
}

#[tokio::test]
async fn test_create_intent_sends_ready_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/ready"))
        .and(header("authorization", "SECRET_KEY DEV-secret"))
        .and(body_partial_json(json!({
            "cid": "TC0ONETIME",
            "partner_order_id": "O-1",
            "partner_user_id": "B1",
            "item_name": "Candy 외 1건",
            "quantity": 3,
            "total_amount": 5000,
            "tax_free_amount": 0,
            "approval_url": "http://shop.local/payment/qr/success?orderId=O-1",
            "cancel_url": "http://shop.local/payment/qr/cancel?orderId=O-1",
            "fail_url": "http://shop.local/payment/qr/fail?orderId=O-1",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tid": "T1234",
            "next_redirect_pc_url": "https://pay.example/T1234/pc",
            "next_redirect_mobile_url": "https://pay.example/T1234/mobile",
            "next_redirect_app_url": "https://pay.example/T1234/app",
            "created_at": "2024-03-01T09:30:00",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let handle = gateway(&server).create_intent(&intent()).await.unwrap();

    assert_eq!(handle.transaction_ref, "T1234");
    assert_eq!(handle.redirect_pc_url, "https://pay.example/T1234/pc");
    assert_eq!(
        handle.redirect_app_url.as_deref(),
        Some("https://pay.example/T1234/app")
    );
}

#[tokio::test]
async fn test_create_intent_client_error_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/ready"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": -780,
            "error_message": "invalid cid",
        })))
        .mount(&server)
        .await;

    let err = gateway(&server).create_intent(&intent()).await.unwrap_err();

    match err {
        GatewayError::Rejected(detail) => assert!(detail.contains("invalid cid")),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_approve_maps_amount_and_timestamp() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/approve"))
        .and(body_partial_json(json!({
            "tid": "T1234",
            "partner_order_id": "O-1",
            "pg_token": "pg-1",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tid": "T1234",
            "amount": { "total": 5000, "tax_free": 0 },
            "approved_at": "2024-03-01T09:30:00",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let approval = gateway(&server)
        .approve(&registered_intent(), "pg-1")
        .await
        .unwrap();

    assert_eq!(approval.order_id, OrderId::new("O-1"));
    assert_eq!(approval.gateway_transaction_id, "T1234");
    assert_eq!(approval.approved_amount, Money::from_minor(5000));
    assert_eq!(approval.approved_at.to_rfc3339(), "2024-03-01T00:30:00+00:00");
}

#[tokio::test]
async fn test_approve_client_error_is_approval_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/approve"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": -702,
            "error_message": "payment already done",
        })))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .approve(&registered_intent(), "pg-1")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::ApprovalRejected(_)));
}

#[tokio::test]
async fn test_approve_server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/approve"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .approve(&registered_intent(), "pg-1")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Unavailable(_)));
}

#[tokio::test]
async fn test_approve_without_transaction_skips_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = gateway(&server).approve(&intent(), "pg-1").await.unwrap_err();

    assert!(matches!(err, GatewayError::ApprovalRejected(_)));
}

#[tokio::test]
async fn test_approve_unreadable_success_body_leaves_outcome_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/approve"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .approve(&registered_intent(), "pg-1")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::OutcomeUnknown(_)));
}

#[tokio::test]
async fn test_approve_read_timeout_leaves_outcome_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/approve"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "tid": "T1234",
                    "amount": { "total": 5000 },
                }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = gateway_with_timeout(&server, Duration::from_millis(200))
        .approve(&registered_intent(), "pg-1")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::OutcomeUnknown(_)));
}

#[tokio::test]
async fn test_unreachable_gateway_on_approve_is_unavailable() {
    let server = MockServer::builder().start().await;
    let gateway = gateway(&server);
    drop(server);

    let err = gateway
        .approve(&registered_intent(), "pg-1")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Unavailable(_)));
}

#[tokio::test]
async fn test_finalize_with_unreadable_approve_body_completes_from_order_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/ready"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tid": "T1234",
            "next_redirect_pc_url": "https://pay.example/T1234/pc",
            "next_redirect_mobile_url": "https://pay.example/T1234/mobile",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/approve"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/order"))
        .and(body_partial_json(json!({ "tid": "T1234" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tid": "T1234",
            "status": "SUCCESS_PAYMENT",
            "amount": { "total": 5000 },
            "approved_at": "2024-03-01T09:30:00",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orders = InMemoryOrderWriter::new();
    let inventory = InMemoryInventory::new();
    inventory.set_stock("P1", 10);
    inventory.set_stock("P2", 5);
    let orchestrator = PaymentOrchestrator::new(
        gateway(&server),
        orders.clone(),
        InMemoryCouponLedger::new(),
        inventory,
        OrchestratorConfig::default(),
    );

    let request = PaymentRequest::new(
        "B1",
        vec![
            LineItem::new("P1", "Candy", 2, Money::from_minor(1500)),
            LineItem::new("P2", "Jelly", 1, Money::from_minor(2000)),
        ],
    );
    let order_id = orchestrator.prepare(request).await.unwrap().order_id;

    let outcome = orchestrator.finalize(&order_id, "pg-1").await.unwrap();

    assert!(matches!(outcome, FinalizeOutcome::Completed { .. }));
    assert_eq!(orders.order_count(), 1);
    let record = orchestrator.status(&order_id).await.unwrap();
    assert_eq!(record.state, PaymentState::Finalized);
}

#[tokio::test]
async fn test_lookup_reports_approved_charge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/order"))
        .and(body_partial_json(json!({ "cid": "TC0ONETIME", "tid": "T1234" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tid": "T1234",
            "status": "SUCCESS_PAYMENT",
            "amount": { "total": 5000 },
            "approved_at": "2024-03-01T09:30:00",
        })))
        .mount(&server)
        .await;

    let approval = gateway(&server)
        .lookup(&registered_intent())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(approval.approved_amount, Money::from_minor(5000));
}

#[tokio::test]
async fn test_lookup_ready_status_is_no_charge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tid": "T1234",
            "status": "READY",
        })))
        .mount(&server)
        .await;

    let result = gateway(&server).lookup(&registered_intent()).await.unwrap();

    assert!(result.is_none());
}

#[tokio::test]
async fn test_unreachable_gateway_is_unavailable() {
    let server = MockServer::builder().start().await;
    let gateway = gateway(&server);
    drop(server);

    let err = gateway.create_intent(&intent()).await.unwrap_err();

    assert!(matches!(err, GatewayError::Unavailable(_)));
}
