//! Provider webhook ingestion.
//!
//! Signature verification happens before anything else, on the raw body.
//! Settlement goes through the repository's conditional transition, so
//! redelivered events and the webhook/poller race are no-ops after the
//! first settlement.

use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse};
use dojo_core::error::AppError;

use crate::models::PaymentStatus;
use crate::providers::ProviderError;
use crate::services::metrics::{PAYMENTS_TOTAL, PAYMENT_AMOUNT_TOTAL, WEBHOOK_EVENTS_TOTAL};
use crate::startup::AppState;

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let provider = state.provider.name();
    let signature = headers
        .get(state.provider.signature_header())
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let event = match state.provider.parse_webhook(&body, signature) {
        Ok(Some(event)) => event,
        Ok(None) => {
            // Event type the engine does not act on; ack so the provider
            // stops redelivering.
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&[provider, "ignored"])
                .inc();
            return Ok(StatusCode::OK);
        }
        Err(ProviderError::InvalidSignature) => {
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&[provider, "invalid_signature"])
                .inc();
            tracing::warn!(provider, "Webhook rejected: invalid signature");
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid webhook signature"
            )));
        }
        Err(ProviderError::MalformedPayload(detail)) => {
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&[provider, "malformed"])
                .inc();
            tracing::warn!(provider, detail = %detail, "Webhook rejected: malformed payload");
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Malformed webhook payload: {}",
                detail
            )));
        }
        Err(e) => {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Webhook parsing failed: {}",
                e
            )));
        }
    };

    let payment = match state
        .db
        .find_payment_by_session(provider, &event.provider_session_id)
        .await?
    {
        Some(payment) => payment,
        None => {
            // Unknown sessions are acked: redelivery cannot make them known.
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&[provider, "unknown_session"])
                .inc();
            tracing::warn!(
                provider,
                provider_session_id = %event.provider_session_id,
                "Webhook for unknown provider session"
            );
            return Ok(StatusCode::OK);
        }
    };

    let next = event.outcome.as_status();
    let current = PaymentStatus::from_string(&payment.status);
    if !current.can_transition_to(next) {
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[provider, "ignored"])
            .inc();
        tracing::info!(
            payment_id = %payment.payment_id,
            status = %payment.status,
            "Webhook for settled payment; no-op"
        );
        return Ok(StatusCode::OK);
    }

    let transitioned = state
        .db
        .settle_payment(
            &payment,
            next,
            Some(event.paid_at),
            event.receipt_url.as_deref(),
            event.payment_intent_id.as_deref(),
        )
        .await?;

    if transitioned {
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[provider, "settled"])
            .inc();
        PAYMENTS_TOTAL
            .with_label_values(&[provider, next.as_str()])
            .inc();
        if next == PaymentStatus::Succeeded {
            PAYMENT_AMOUNT_TOTAL
                .with_label_values(&[payment.currency.as_str()])
                .inc_by(payment.total_amount as f64);
        }
    } else {
        // Lost the settle race to a concurrent delivery.
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[provider, "ignored"])
            .inc();
    }

    Ok(StatusCode::OK)
}
