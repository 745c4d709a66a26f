//! Square payment provider adapter.
//!
//! Implements Square's Payment Links API (hosted redirect flow) and webhook
//! signature verification per the `x-square-hmacsha256-signature` scheme.
//! The payment link's order id is the session reference; `payment.updated`
//! webhooks carry the same order id for correlation.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::SquareConfig;
use crate::providers::{
    ConfirmedEvent, PaymentOutcome, PaymentProvider, ProviderError, ProviderSession,
    SessionFlow, SessionRequest,
};

/// Square client for Payment Links and webhook verification.
#[derive(Clone)]
pub struct SquareClient {
    client: Client,
    config: SquareConfig,
}

/// Request to create a payment link.
#[derive(Debug, Serialize)]
pub struct CreatePaymentLinkRequest {
    pub idempotency_key: String,
    pub quick_pay: QuickPay,
    pub checkout_options: CheckoutOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_populated_data: Option<PrePopulatedData>,
}

#[derive(Debug, Serialize)]
pub struct QuickPay {
    pub name: String,
    pub price_money: SquareMoney,
    pub location_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SquareMoney {
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutOptions {
    pub redirect_url: String,
}

#[derive(Debug, Serialize)]
pub struct PrePopulatedData {
    pub buyer_email: String,
}

/// Response from payment link creation.
#[derive(Debug, Deserialize)]
pub struct PaymentLinkResponse {
    pub payment_link: PaymentLink,
}

#[derive(Debug, Deserialize)]
pub struct PaymentLink {
    pub id: String,
    pub url: String,
    pub order_id: String,
}

/// Square API error response.
#[derive(Debug, Deserialize)]
pub struct SquareApiError {
    #[serde(default)]
    pub errors: Vec<SquareApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct SquareApiErrorDetail {
    pub category: String,
    pub code: String,
    pub detail: Option<String>,
}

/// Square webhook event envelope.
#[derive(Debug, Deserialize)]
pub struct SquareEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub event_id: Option<String>,
    pub created_at: String,
    pub data: SquareEventData,
}

#[derive(Debug, Deserialize)]
pub struct SquareEventData {
    pub object: SquareEventObject,
}

#[derive(Debug, Deserialize)]
pub struct SquareEventObject {
    pub payment: Option<SquarePayment>,
}

/// Square payment entity, as carried by `payment.updated` events.
#[derive(Debug, Deserialize)]
pub struct SquarePayment {
    pub id: String,
    pub order_id: Option<String>,
    pub status: String,
    pub receipt_url: Option<String>,
}

impl SquareClient {
    pub fn new(config: SquareConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if Square is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.access_token.expose_secret().is_empty()
            && !self.config.webhook_signature_key.expose_secret().is_empty()
            && !self.config.location_id.is_empty()
    }

    /// Verify the webhook signature: Base64(HMAC-SHA256(url + body)) keyed
    /// with the webhook signature key, where url is the subscription's
    /// notification URL.
    fn verify_signature(&self, body: &str, signature: &str) -> Result<(), ProviderError> {
        let payload = format!("{}{}", self.config.notification_url, body);
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(
            self.config.webhook_signature_key.expose_secret().as_bytes(),
        )
        .map_err(|_| ProviderError::NotConfigured("square"))?;
        mac.update(payload.as_bytes());
        let expected = BASE64.encode(mac.finalize().into_bytes());

        if expected == signature {
            Ok(())
        } else {
            tracing::warn!("Square webhook signature verification failed");
            Err(ProviderError::InvalidSignature)
        }
    }
}

#[async_trait]
impl PaymentProvider for SquareClient {
    fn name(&self) -> &'static str {
        "square"
    }

    fn signature_header(&self) -> &'static str {
        "x-square-hmacsha256-signature"
    }

    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<ProviderSession, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured("square"));
        }

        let url = format!(
            "{}/v2/online-checkout/payment-links",
            self.config.api_base_url
        );
        let payload = CreatePaymentLinkRequest {
            // Square deduplicates on this key, so a retried request cannot
            // open a second link for the same payment.
            idempotency_key: request.payment_id.to_string(),
            quick_pay: QuickPay {
                name: request.description.clone(),
                price_money: SquareMoney {
                    amount: request.amount.minor_units(),
                    currency: request.amount.currency().as_str().to_string(),
                },
                location_id: self.config.location_id.clone(),
            },
            checkout_options: CheckoutOptions {
                redirect_url: request.success_url.clone(),
            },
            pre_populated_data: Some(PrePopulatedData {
                buyer_email: request.customer_email.clone(),
            }),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "Square create_session response");

        if status.is_success() {
            let link: PaymentLinkResponse = serde_json::from_str(&body)
                .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;
            tracing::info!(
                payment_link_id = %link.payment_link.id,
                order_id = %link.payment_link.order_id,
                payment_id = %request.payment_id,
                amount = request.amount.minor_units(),
                "Square payment link created"
            );
            Ok(ProviderSession {
                session_id: link.payment_link.order_id,
                flow: SessionFlow::Redirect {
                    url: link.payment_link.url,
                },
            })
        } else {
            let detail = serde_json::from_str::<SquareApiError>(&body)
                .ok()
                .and_then(|e| {
                    e.errors.first().map(|err| {
                        format!(
                            "{}/{}: {}",
                            err.category,
                            err.code,
                            err.detail.clone().unwrap_or_default()
                        )
                    })
                })
                .unwrap_or(body);
            tracing::error!(status = %status, detail = %detail, "Square payment link creation failed");
            Err(ProviderError::Api {
                status: status.as_u16(),
                detail,
            })
        }
    }

    fn parse_webhook(
        &self,
        body: &str,
        signature: &str,
    ) -> Result<Option<ConfirmedEvent>, ProviderError> {
        self.verify_signature(body, signature)?;

        let event: SquareEvent = serde_json::from_str(body)
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;

        if event.event_type != "payment.updated" && event.event_type != "payment.created" {
            tracing::debug!(event_type = %event.event_type, "Ignoring Square event");
            return Ok(None);
        }

        let payment = event
            .data
            .object
            .payment
            .ok_or_else(|| ProviderError::MalformedPayload("event has no payment object".into()))?;

        let outcome = match payment.status.as_str() {
            "COMPLETED" => PaymentOutcome::Succeeded,
            "FAILED" | "CANCELED" => PaymentOutcome::Failed,
            other => {
                // APPROVED and PENDING resolve in a later delivery.
                tracing::debug!(status = %other, "Ignoring non-terminal Square payment status");
                return Ok(None);
            }
        };

        let order_id = payment.order_id.ok_or_else(|| {
            ProviderError::MalformedPayload("payment event has no order_id".into())
        })?;
        let paid_at = DateTime::parse_from_rfc3339(&event.created_at)
            .map_err(|e| ProviderError::MalformedPayload(format!("bad created_at: {}", e)))?
            .with_timezone(&Utc);

        Ok(Some(ConfirmedEvent {
            provider_session_id: order_id,
            outcome,
            payment_intent_id: Some(payment.id),
            receipt_url: payment.receipt_url,
            paid_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_config() -> SquareConfig {
        SquareConfig {
            access_token: Secret::new("sq_test_token".to_string()),
            webhook_signature_key: Secret::new("sq_sig_key".to_string()),
            api_base_url: "https://connect.squareup.com".to_string(),
            location_id: "L12345".to_string(),
            notification_url: "https://dojo.example/webhooks/payments".to_string(),
        }
    }

    fn sign(body: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let payload = format!("https://dojo.example/webhooks/payments{}", body);
        let mut mac = HmacSha256::new_from_slice(b"sq_sig_key").unwrap();
        mac.update(payload.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn payment_event(status: &str, order_id: Option<&str>) -> String {
        serde_json::json!({
            "type": "payment.updated",
            "event_id": "evt-1",
            "created_at": "2026-03-01T17:45:13.000Z",
            "data": { "object": { "payment": {
                "id": "pmt_1",
                "order_id": order_id,
                "status": status,
                "receipt_url": "https://squareup.com/receipt/preview/pmt_1"
            }}}
        })
        .to_string()
    }

    #[test]
    fn test_is_configured() {
        assert!(SquareClient::new(test_config()).is_configured());

        let mut empty = test_config();
        empty.access_token = Secret::new(String::new());
        assert!(!SquareClient::new(empty).is_configured());
    }

    #[test]
    fn completed_payment_settles_succeeded() {
        let client = SquareClient::new(test_config());
        let body = payment_event("COMPLETED", Some("order_1"));
        let event = client.parse_webhook(&body, &sign(&body)).unwrap().unwrap();

        assert_eq!(event.provider_session_id, "order_1");
        assert_eq!(event.outcome, PaymentOutcome::Succeeded);
        assert_eq!(event.payment_intent_id.as_deref(), Some("pmt_1"));
        assert!(event.receipt_url.is_some());
    }

    #[test]
    fn failed_and_canceled_settle_failed() {
        let client = SquareClient::new(test_config());
        for status in ["FAILED", "CANCELED"] {
            let body = payment_event(status, Some("order_1"));
            let event = client.parse_webhook(&body, &sign(&body)).unwrap().unwrap();
            assert_eq!(event.outcome, PaymentOutcome::Failed);
        }
    }

    #[test]
    fn pending_statuses_are_ignored() {
        let client = SquareClient::new(test_config());
        for status in ["APPROVED", "PENDING"] {
            let body = payment_event(status, Some("order_1"));
            assert!(client.parse_webhook(&body, &sign(&body)).unwrap().is_none());
        }
    }

    #[test]
    fn unrelated_event_types_are_ignored() {
        let client = SquareClient::new(test_config());
        let body = serde_json::json!({
            "type": "catalog.version.updated",
            "created_at": "2026-03-01T17:45:13.000Z",
            "data": { "object": {} }
        })
        .to_string();
        assert!(client.parse_webhook(&body, &sign(&body)).unwrap().is_none());
    }

    #[test]
    fn bad_signature_is_rejected() {
        let client = SquareClient::new(test_config());
        let body = payment_event("COMPLETED", Some("order_1"));
        assert!(matches!(
            client.parse_webhook(&body, "bm90IGEgc2lnbmF0dXJl"),
            Err(ProviderError::InvalidSignature)
        ));
    }

    #[test]
    fn missing_order_id_is_malformed() {
        let client = SquareClient::new(test_config());
        let body = payment_event("COMPLETED", None);
        assert!(matches!(
            client.parse_webhook(&body, &sign(&body)),
            Err(ProviderError::MalformedPayload(_))
        ));
    }
}
