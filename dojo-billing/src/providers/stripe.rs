//! Stripe payment provider adapter.
//!
//! Implements Stripe's Checkout Sessions API (hosted redirect flow) and
//! webhook signature verification per the `Stripe-Signature` scheme.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;

use crate::config::StripeConfig;
use crate::providers::{
    ConfirmedEvent, PaymentOutcome, PaymentProvider, ProviderError, ProviderSession,
    SessionFlow, SessionRequest,
};

/// Maximum accepted age of a signed webhook timestamp, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stripe client for Checkout Sessions and webhook verification.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

/// Checkout Session object, as returned by session creation and carried in
/// `checkout.session.*` webhook events.
#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub payment_intent: Option<String>,
    pub payment_status: Option<String>,
    pub status: Option<String>,
}

/// Stripe API error response.
#[derive(Debug, Deserialize)]
pub struct StripeApiError {
    pub error: StripeApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct StripeApiErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Stripe webhook event envelope.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: CheckoutSession,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if Stripe is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
            && !self.config.webhook_secret.expose_secret().is_empty()
    }

    /// Verify a `Stripe-Signature` header against the raw request body.
    ///
    /// The header carries `t=<unix ts>,v1=<hex hmac>[,v1=...]`; the signed
    /// payload is `"{t}.{body}"`. Timestamps older than the tolerance are
    /// rejected to keep replayed deliveries out.
    fn verify_signature(&self, body: &str, header: &str) -> Result<(), ProviderError> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(ProviderError::InvalidSignature)?;
        if candidates.is_empty() {
            return Err(ProviderError::InvalidSignature);
        }
        if (Utc::now().timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(timestamp, "Stripe webhook timestamp outside tolerance");
            return Err(ProviderError::InvalidSignature);
        }

        let signed_payload = format!("{}.{}", timestamp, body);
        let expected = compute_signature(
            &signed_payload,
            self.config.webhook_secret.expose_secret(),
        )?;
        if candidates.iter().any(|candidate| *candidate == expected) {
            Ok(())
        } else {
            tracing::warn!("Stripe webhook signature verification failed");
            Err(ProviderError::InvalidSignature)
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn signature_header(&self) -> &'static str {
        "stripe-signature"
    }

    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<ProviderSession, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured("stripe"));
        }

        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);
        let params: Vec<(&str, String)> = vec![
            ("mode", "payment".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("client_reference_id", request.payment_id.to_string()),
            ("customer_email", request.customer_email.clone()),
            ("metadata[payment_id]", request.payment_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                request.amount.currency().as_str().to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                request.amount.minor_units().to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                request.description.clone(),
            ),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "Stripe create_session response");

        if status.is_success() {
            let session: CheckoutSession = serde_json::from_str(&body)
                .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;
            let redirect_url = session.url.ok_or_else(|| {
                ProviderError::MalformedPayload("checkout session missing redirect url".into())
            })?;
            tracing::info!(
                session_id = %session.id,
                payment_id = %request.payment_id,
                amount = request.amount.minor_units(),
                "Stripe checkout session created"
            );
            Ok(ProviderSession {
                session_id: session.id,
                flow: SessionFlow::Redirect { url: redirect_url },
            })
        } else {
            let detail = serde_json::from_str::<StripeApiError>(&body)
                .map(|e| {
                    format!(
                        "{}: {}",
                        e.error.error_type,
                        e.error.message.unwrap_or_default()
                    )
                })
                .unwrap_or(body);
            tracing::error!(status = %status, detail = %detail, "Stripe session creation failed");
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

        let event: StripeEvent = serde_json::from_str(body)
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;

        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" => {
                // Async payment methods complete later; only a paid session
                // settles here.
                if event.data.object.payment_status.as_deref() == Some("paid") {
                    PaymentOutcome::Succeeded
                } else {
                    return Ok(None);
                }
            }
            "checkout.session.async_payment_succeeded" => PaymentOutcome::Succeeded,
            "checkout.session.async_payment_failed" => PaymentOutcome::Failed,
            "checkout.session.expired" => PaymentOutcome::Failed,
            other => {
                tracing::debug!(event_type = %other, "Ignoring Stripe event");
                return Ok(None);
            }
        };

        let paid_at = DateTime::<Utc>::from_timestamp(event.created, 0).ok_or_else(|| {
            ProviderError::MalformedPayload(format!("bad event timestamp {}", event.created))
        })?;

        Ok(Some(ConfirmedEvent {
            provider_session_id: event.data.object.id,
            outcome,
            payment_intent_id: event.data.object.payment_intent,
            receipt_url: None,
            paid_at,
        }))
    }
}

/// Compute a hex HMAC-SHA256 signature.
fn compute_signature(payload: &str, secret: &str) -> Result<String, ProviderError> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ProviderError::NotConfigured("stripe"))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
