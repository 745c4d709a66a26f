//! Payment provider adapters.
//!
//! Exactly one provider is active per deployment, chosen by configuration,
//! never per payment. Both adapters expose the same narrow surface: create a
//! checkout session for an amount, and turn a signed webhook delivery into a
//! normalized confirmed event. The orchestrator and the confirmation path
//! never see provider-specific shapes.

pub mod square;
pub mod stripe;

pub use square::SquareClient;
pub use stripe::StripeClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::PaymentStatus;
use crate::money::Money;

/// Provider adapter failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected the request ({status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("webhook signature verification failed")]
    InvalidSignature,

    #[error("malformed provider payload: {0}")]
    MalformedPayload(String),

    #[error("{0} credentials not configured")]
    NotConfigured(&'static str),
}

/// How the client continues after session creation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum SessionFlow {
    /// Hosted checkout: redirect the browser to the provider's page.
    Redirect { url: String },
    /// Embedded card element: hand the client secret to the provider's JS.
    Embedded { client_secret: String },
}

/// A session opened with the provider.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub session_id: String,
    pub flow: SessionFlow,
}

/// Inputs to session creation. `payment_id` is the local pending payment,
/// carried in provider metadata for support tooling.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub payment_id: Uuid,
    pub amount: Money,
    pub description: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Outcome carried by a confirmation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

impl PaymentOutcome {
    pub fn as_status(&self) -> PaymentStatus {
        match self {
            PaymentOutcome::Succeeded => PaymentStatus::Succeeded,
            PaymentOutcome::Failed => PaymentStatus::Failed,
        }
    }
}

/// A provider confirmation, normalized across adapters.
#[derive(Debug, Clone)]
pub struct ConfirmedEvent {
    pub provider_session_id: String,
    pub outcome: PaymentOutcome,
    pub payment_intent_id: Option<String>,
    pub receipt_url: Option<String>,
    pub paid_at: DateTime<Utc>,
}

/// Uniform interface over the checkout providers.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Request header carrying the webhook signature.
    fn signature_header(&self) -> &'static str;

    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<ProviderSession, ProviderError>;

    /// Verify the signature and parse the delivery. `Ok(None)` means the
    /// event type is not one the engine acts on; it is acknowledged without
    /// side effects.
    fn parse_webhook(
        &self,
        body: &str,
        signature: &str,
    ) -> Result<Option<ConfirmedEvent>, ProviderError>;
}
