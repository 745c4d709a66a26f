//! Stripe adapter integration tests against a wiremock server: request
//! construction, response parsing, and API error mapping without touching
//! the live API.

use secrecy::Secret;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dojo_billing::config::StripeConfig;
use dojo_billing::money::{Currency, Money};
use dojo_billing::providers::{
    PaymentProvider, ProviderError, SessionFlow, SessionRequest, StripeClient,
};

fn stripe_client(server: &MockServer) -> StripeClient {
    StripeClient::new(StripeConfig {
        secret_key: Secret::new("sk_test_123".to_string()),
        webhook_secret: Secret::new("whsec_test".to_string()),
        api_base_url: server.uri(),
    })
}

fn session_request(payment_id: Uuid) -> SessionRequest {
    SessionRequest {
        payment_id,
        amount: Money::new(12_204, Currency::Cad),
        description: "Monthly group training: Tanaka family".to_string(),
        customer_email: "tanaka@example.com".to_string(),
        success_url: "http://localhost:3000/billing/success".to_string(),
        cancel_url: "http://localhost:3000/billing/cancel".to_string(),
    }
}

#[tokio::test]
async fn create_session_returns_redirect_flow() {
    let server = MockServer::start().await;
    let payment_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_string_contains("mode=payment"))
        .and(body_string_contains("unit_amount%5D=12204"))
        .and(body_string_contains(payment_id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "cs_test_abc",
            "url": "https://checkout.stripe.com/c/pay/cs_test_abc",
            "payment_intent": null,
            "payment_status": "unpaid",
            "status": "open"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = stripe_client(&server)
        .create_session(&session_request(payment_id))
        .await
        .expect("Failed to create session");

    assert_eq!(session.session_id, "cs_test_abc");
    match session.flow {
        SessionFlow::Redirect { url } => {
            assert_eq!(url, "https://checkout.stripe.com/c/pay/cs_test_abc")
        }
        other => panic!("expected redirect flow, got {:?}", other),
    }
}

#[tokio::test]
async fn api_error_maps_to_provider_error_with_detail() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
            "error": {
                "type": "card_error",
                "code": "card_declined",
                "message": "Your card was declined."
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = stripe_client(&server)
        .create_session(&session_request(Uuid::new_v4()))
        .await
        .expect_err("error response must not produce a session");

    match err {
        ProviderError::Api { status, detail } => {
            assert_eq!(status, 402);
            assert!(detail.contains("card_error"), "detail was {detail}");
            assert!(detail.contains("declined"), "detail was {detail}");
        }
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn success_without_redirect_url_is_malformed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "cs_test_abc",
            "url": null,
            "payment_intent": null,
            "payment_status": "unpaid",
            "status": "open"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = stripe_client(&server)
        .create_session(&session_request(Uuid::new_v4()))
        .await
        .expect_err("session without a url is unusable");
    assert!(matches!(err, ProviderError::MalformedPayload(_)));
}

#[tokio::test]
async fn missing_credentials_fail_before_any_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = StripeClient::new(StripeConfig {
        secret_key: Secret::new(String::new()),
        webhook_secret: Secret::new(String::new()),
        api_base_url: server.uri(),
    });

    let err = client
        .create_session(&session_request(Uuid::new_v4()))
        .await
        .expect_err("unconfigured client must refuse");
    assert!(matches!(err, ProviderError::NotConfigured("stripe")));
}
