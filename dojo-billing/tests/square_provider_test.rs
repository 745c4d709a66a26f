//! Square adapter integration tests against a wiremock server. The order id
//! on the created payment link is the session reference the engine stores,
//! because `payment.updated` webhooks carry the order id, not the link id.

use secrecy::Secret;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dojo_billing::config::SquareConfig;
use dojo_billing::money::{Currency, Money};
use dojo_billing::providers::{
    PaymentProvider, ProviderError, SessionFlow, SessionRequest, SquareClient,
};

fn square_client(server: &MockServer) -> SquareClient {
    SquareClient::new(SquareConfig {
        access_token: Secret::new("sq_test_token".to_string()),
        webhook_signature_key: Secret::new("sq_sig_key".to_string()),
        api_base_url: server.uri(),
        location_id: "L12345".to_string(),
        notification_url: "https://dojo.example/webhooks/payments".to_string(),
    })
}

fn session_request(payment_id: Uuid) -> SessionRequest {
    SessionRequest {
        payment_id,
        amount: Money::new(19_210, Currency::Cad),
        description: "Monthly group training: Tanaka family".to_string(),
        customer_email: "tanaka@example.com".to_string(),
        success_url: "http://localhost:3000/billing/success".to_string(),
        cancel_url: "http://localhost:3000/billing/cancel".to_string(),
    }
}

#[tokio::test]
async fn create_session_uses_order_id_as_session_reference() {
    let server = MockServer::start().await;
    let payment_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/v2/online-checkout/payment-links"))
        .and(header("authorization", "Bearer sq_test_token"))
        .and(body_partial_json(serde_json::json!({
            "idempotency_key": payment_id.to_string(),
            "quick_pay": {
                "price_money": { "amount": 19_210, "currency": "CAD" },
                "location_id": "L12345"
            },
            "checkout_options": {
                "redirect_url": "http://localhost:3000/billing/success"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "payment_link": {
                "id": "plink_1",
                "url": "https://square.link/u/abcdef",
                "order_id": "order_xyz"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = square_client(&server)
        .create_session(&session_request(payment_id))
        .await
        .expect("Failed to create payment link");

    assert_eq!(session.session_id, "order_xyz");
    match session.flow {
        SessionFlow::Redirect { url } => assert_eq!(url, "https://square.link/u/abcdef"),
        other => panic!("expected redirect flow, got {:?}", other),
    }
}

#[tokio::test]
async fn api_error_maps_first_error_detail() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/online-checkout/payment-links"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "errors": [{
                "category": "INVALID_REQUEST_ERROR",
                "code": "BAD_REQUEST",
                "detail": "location_id is not valid"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = square_client(&server)
        .create_session(&session_request(Uuid::new_v4()))
        .await
        .expect_err("error response must not produce a session");

    match err {
        ProviderError::Api { status, detail } => {
            assert_eq!(status, 400);
            assert!(detail.contains("INVALID_REQUEST_ERROR"), "detail was {detail}");
            assert!(detail.contains("location_id"), "detail was {detail}");
        }
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn retried_request_carries_the_same_idempotency_key() {
    let server = MockServer::start().await;
    let payment_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/v2/online-checkout/payment-links"))
        .and(body_partial_json(serde_json::json!({
            "idempotency_key": payment_id.to_string()
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "payment_link": {
                "id": "plink_1",
                "url": "https://square.link/u/abcdef",
                "order_id": "order_xyz"
            }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = square_client(&server);
    let request = session_request(payment_id);
    let first = client.create_session(&request).await.expect("first attempt");
    let second = client.create_session(&request).await.expect("second attempt");
    assert_eq!(first.session_id, second.session_id);
}

#[tokio::test]
async fn missing_credentials_fail_before_any_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = SquareClient::new(SquareConfig {
        access_token: Secret::new(String::new()),
        webhook_signature_key: Secret::new(String::new()),
        api_base_url: server.uri(),
        location_id: String::new(),
        notification_url: String::new(),
    });

    let err = client
        .create_session(&session_request(Uuid::new_v4()))
        .await
        .expect_err("unconfigured client must refuse");
    assert!(matches!(err, ProviderError::NotConfigured("square")));
}
