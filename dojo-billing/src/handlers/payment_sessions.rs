//! Payment session creation and status polling.
//!
//! The session endpoint is the orchestrator: it prices the charge from
//! enrollment data, validates the discount, snapshots taxes, writes the
//! pending payment, and only then talks to the provider. Client-supplied
//! totals are never billed.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use dojo_core::error::AppError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::charges::{self, ChargeBreakdown, ChargeError, ChargeOption};
use crate::discounts::{self, DiscountContext};
use crate::models::{
    ChargeLineItem, CreatePayment, DiscountValidationResult, ItemType, PaymentPayee,
};
use crate::money::{Currency, Money};
use crate::providers::{ProviderError, SessionFlow, SessionRequest};
use crate::services::metrics::{DISCOUNT_VALIDATIONS_TOTAL, ERRORS_TOTAL, PAYMENTS_TOTAL};
use crate::startup::AppState;

/// Failures after the charge has been priced and recorded.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The provider call failed. The referenceless pending row stays behind
    /// for the sweeper; the client may retry with a fresh session.
    #[error("payment provider session creation failed")]
    ProviderSessionCreationFailed(#[source] ProviderError),

    /// The provider session exists but could not be recorded on the payment.
    /// Never retried automatically: a second session could double-charge.
    #[error("payment {payment_id} and provider session {session_id} are out of sync")]
    RecordInconsistent { payment_id: Uuid, session_id: String },
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::ProviderSessionCreationFailed(_) => AppError::BadGateway(
                "Payment provider is unavailable; please try again".to_string(),
            ),
            OrchestratorError::RecordInconsistent { payment_id, .. } => {
                AppError::InternalError(anyhow::anyhow!(
                    "Payment {} could not be finalized; contact support before retrying",
                    payment_id
                ))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentSessionRequest {
    pub family_id: Uuid,
    #[serde(default)]
    pub student_ids: Vec<Uuid>,
    pub option: ChargeOption,
    pub discount_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AmountsResponse {
    pub currency: Currency,
    pub subtotal: i64,
    pub discount_total: i64,
    pub tax_total: i64,
    pub total: i64,
}

impl From<&ChargeBreakdown> for AmountsResponse {
    fn from(breakdown: &ChargeBreakdown) -> Self {
        Self {
            currency: breakdown.currency,
            subtotal: breakdown.subtotal.minor_units(),
            discount_total: breakdown.discount_total.minor_units(),
            tax_total: breakdown.tax_total.minor_units(),
            total: breakdown.total.minor_units(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentSessionResponse {
    pub payment_id: Uuid,
    pub provider: String,
    pub session_id: String,
    #[serde(flatten)]
    pub flow: SessionFlow,
    pub amounts: AmountsResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<DiscountValidationResult>,
}

#[tracing::instrument(skip(state, req), fields(family_id = %req.family_id))]
pub async fn create_payment_session(
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let family = state
        .db
        .get_family(req.family_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Family not found")))?;

    let category = req.option.category();

    // Price the charge from server-side data.
    let (mut items, currency, invoice, payees) = match req.option {
        ChargeOption::InvoicePayment { invoice_id } => {
            let invoice = state
                .db
                .get_invoice(invoice_id)
                .await?
                .filter(|inv| inv.family_id == family.family_id)
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
            if invoice.status != "issued" {
                return Err(AppError::UnprocessableEntity(anyhow::anyhow!(
                    "Invoice is {} and cannot be paid",
                    invoice.status
                )));
            }
            let currency: Currency = invoice.currency.parse().map_err(|_| {
                AppError::InternalError(anyhow::anyhow!(
                    "Invoice {} has unknown currency {}",
                    invoice.invoice_id,
                    invoice.currency
                ))
            })?;
            // Invoice totals were frozen at issue time, taxes included, so
            // the charge is a single fee line with no tax re-resolution.
            let item = ChargeLineItem::new(
                format!("Invoice {}", invoice.invoice_id),
                ItemType::Fee,
                1,
                Money::new(invoice.total_amount, currency),
            );
            (vec![item], currency, Some(invoice), Vec::new())
        }
        _ => {
            if req.student_ids.is_empty() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "student_ids must not be empty"
                )));
            }
            let students = state
                .db
                .get_active_students(family.family_id, &req.student_ids)
                .await?;
            if students.len() != req.student_ids.len() {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "One or more students were not found in this family"
                )));
            }

            let enrollments = state.db.get_active_enrollments(&req.student_ids).await?;
            let mut roster = Vec::with_capacity(students.len());
            for student in students {
                let enrollment = enrollments
                    .iter()
                    .find(|e| e.student_id == student.student_id)
                    .cloned()
                    .ok_or_else(|| {
                        AppError::UnprocessableEntity(anyhow::anyhow!(
                            "{} {} has no active enrollment",
                            student.first_name,
                            student.last_name
                        ))
                    })?;
                roster.push((student, enrollment));
            }

            let currency: Currency = roster[0].1.currency.parse().map_err(|_| {
                AppError::InternalError(anyhow::anyhow!(
                    "Enrollment {} has unknown currency {}",
                    roster[0].1.enrollment_id,
                    roster[0].1.currency
                ))
            })?;

            // Fail-closed: a tax lookup failure blocks the charge here.
            let tax_rates = charges::resolve_tax_rates(&state.db, category).await?;

            let quantity = req.option.payee_quantity()?;
            let payees = roster
                .iter()
                .map(|(student, _)| PaymentPayee {
                    student_id: student.student_id,
                    quantity,
                })
                .collect();

            let items = charges::enrollment_line_items(
                &req.option,
                &roster,
                &tax_rates,
                Utc::now().date_naive(),
            )?;
            (items, currency, None, payees)
        }
    };

    // Phase B discount validation, fail-open: an invalid code zeroes the
    // discount and the checkout proceeds with a notice.
    let mut discount = None;
    let mut discount_code_id = None;
    if let Some(code_str) = req.discount_code.as_deref() {
        let found = state.db.find_discount_by_code(code_str).await?;
        let ctx = DiscountContext {
            family_id: family.family_id,
            student_ids: req.student_ids.clone(),
            category,
            subtotal: gross_subtotal(&items, currency)?,
        };
        let result = discounts::validate(found.as_ref(), &ctx, Utc::now());
        DISCOUNT_VALIDATIONS_TOTAL
            .with_label_values(&[if result.is_valid { "valid" } else { "invalid" }])
            .inc();
        if result.is_valid {
            if let Some(code) = found.as_ref() {
                discounts::apply_discount(&mut items, code, result.discount_amount)
                    .map_err(ChargeError::from)?;
                discount_code_id = result.discount_code_id;
            }
        }
        discount = Some(result);
    }

    let breakdown = charges::compute_charges(&items, currency)?;
    // Line-level rounding is authoritative and can differ from the
    // subtotal-level estimate by a minor unit; echo the breakdown's figure
    // so the response carries a single discount amount.
    if let Some(result) = discount.as_mut() {
        if result.is_valid {
            result.discount_amount = breakdown.discount_total;
        }
    }
    let taxes = charges::aggregate_snapshots(&breakdown.lines).map_err(ChargeError::from)?;

    // The pending row goes in before any provider traffic.
    let create = CreatePayment {
        family_id: family.family_id,
        payment_type: req.option.payment_type(),
        currency,
        subtotal_amount: breakdown.subtotal.minor_units(),
        discount_amount: breakdown.discount_total.minor_units(),
        tax_amount: breakdown.tax_total.minor_units(),
        total_amount: breakdown.total.minor_units(),
        discount_code_id,
        invoice_id: invoice.as_ref().map(|inv| inv.invoice_id),
        provider: state.provider.name().to_string(),
        payees,
        taxes,
    };
    let payment = state.db.create_payment(&create).await?;
    PAYMENTS_TOTAL
        .with_label_values(&[state.provider.name(), "pending"])
        .inc();

    let session_request = SessionRequest {
        payment_id: payment.payment_id,
        amount: breakdown.total,
        description: describe_charge(&req.option, &family.name),
        customer_email: family.email.clone(),
        success_url: state.config.checkout.success_url.clone(),
        cancel_url: state.config.checkout.cancel_url.clone(),
    };
    let session = match state.provider.create_session(&session_request).await {
        Ok(session) => session,
        Err(e) => {
            ERRORS_TOTAL.with_label_values(&["provider_session"]).inc();
            tracing::error!(
                payment_id = %payment.payment_id,
                provider = state.provider.name(),
                error = %e,
                "Provider session creation failed; pending row left for the sweeper"
            );
            return Err(OrchestratorError::ProviderSessionCreationFailed(e).into());
        }
    };

    let recorded = match state
        .db
        .set_provider_session(payment.payment_id, &session.session_id)
        .await
    {
        Ok(recorded) => recorded,
        Err(e) => {
            tracing::error!(error = %e, "Failed to record provider session");
            false
        }
    };
    if !recorded {
        ERRORS_TOTAL
            .with_label_values(&["record_inconsistent"])
            .inc();
        tracing::error!(
            payment_id = %payment.payment_id,
            provider_session_id = %session.session_id,
            provider = state.provider.name(),
            "Provider session created but not recorded on the payment"
        );
        return Err(OrchestratorError::RecordInconsistent {
            payment_id: payment.payment_id,
            session_id: session.session_id,
        }
        .into());
    }

    tracing::info!(
        payment_id = %payment.payment_id,
        provider = state.provider.name(),
        total = breakdown.total.minor_units(),
        "Payment session created"
    );

    Ok((
        StatusCode::CREATED,
        Json(PaymentSessionResponse {
            payment_id: payment.payment_id,
            provider: payment.provider,
            session_id: session.session_id,
            flow: session.flow,
            amounts: AmountsResponse::from(&breakdown),
            discount,
        }),
    ))
}

/// Pre-discount subtotal of the derived items, for discount computation.
fn gross_subtotal(items: &[ChargeLineItem], currency: Currency) -> Result<Money, AppError> {
    let mut sum = Money::zero(currency);
    for item in items {
        let gross = item
            .unit_price
            .times(item.quantity)
            .map_err(ChargeError::from)?;
        sum = sum.try_add(gross).map_err(ChargeError::from)?;
    }
    Ok(sum)
}

fn describe_charge(option: &ChargeOption, family_name: &str) -> String {
    match option {
        ChargeOption::Monthly => format!("Monthly group training: {}", family_name),
        ChargeOption::Yearly => format!("Yearly group training: {}", family_name),
        ChargeOption::IndividualSessions { quantity } => {
            format!("{} individual sessions: {}", quantity, family_name)
        }
        ChargeOption::InvoicePayment { invoice_id } => format!("Invoice {}", invoice_id),
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentTaxResponse {
    pub name: String,
    pub rate: Decimal,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub payment_id: Uuid,
    pub status: String,
    pub payment_type: String,
    pub currency: String,
    pub subtotal: i64,
    pub discount_total: i64,
    pub tax_total: i64,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<DateTime<Utc>>,
    pub taxes: Vec<PaymentTaxResponse>,
}

/// Polled by clients while the provider confirms. A 404 here is the
/// not-yet-visible state, not a permanent answer.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let payment = state
        .db
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;
    let taxes = state.db.get_payment_taxes(payment_id).await?;

    Ok(Json(PaymentStatusResponse {
        payment_id: payment.payment_id,
        status: payment.status,
        payment_type: payment.payment_type,
        currency: payment.currency,
        subtotal: payment.subtotal_amount,
        discount_total: payment.discount_amount,
        tax_total: payment.tax_amount,
        total: payment.total_amount,
        receipt_url: payment.receipt_url,
        payment_date: payment.payment_date,
        taxes: taxes
            .into_iter()
            .map(|t| PaymentTaxResponse {
                name: t.tax_name_snapshot,
                rate: t.tax_rate_snapshot,
                amount: t.tax_amount,
            })
            .collect(),
    }))
}
