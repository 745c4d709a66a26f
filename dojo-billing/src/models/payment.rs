//! Payment and payment-tax models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::tax_rate::TaxSnapshot;
use crate::money::Currency;

/// Payment lifecycle status.
///
/// `Pending` is the only non-terminal state. Transitions to `Succeeded` or
/// `Failed` happen exclusively through the provider confirmation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "succeeded" => PaymentStatus::Succeeded,
            "failed" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    /// Terminal states are immutable.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(self, PaymentStatus::Pending) && next.is_terminal()
    }
}

/// What a payment is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    MonthlySubscription,
    YearlySubscription,
    IndividualSession,
    EventRegistration,
    InvoicePayment,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::MonthlySubscription => "monthly_subscription",
            PaymentType::YearlySubscription => "yearly_subscription",
            PaymentType::IndividualSession => "individual_session",
            PaymentType::EventRegistration => "event_registration",
            PaymentType::InvoicePayment => "invoice_payment",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "yearly_subscription" => PaymentType::YearlySubscription,
            "individual_session" => PaymentType::IndividualSession,
            "event_registration" => PaymentType::EventRegistration,
            "invoice_payment" => PaymentType::InvoicePayment,
            _ => PaymentType::MonthlySubscription,
        }
    }
}

/// Payment record. Money columns are integer minor units.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub family_id: Uuid,
    pub payment_type: String,
    pub status: String,
    pub currency: String,
    pub subtotal_amount: i64,
    pub discount_amount: i64,
    pub tax_amount: i64,
    pub total_amount: i64,
    pub discount_code_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub provider: String,
    pub provider_session_id: Option<String>,
    pub provider_payment_intent_id: Option<String>,
    pub receipt_url: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

/// Tax snapshot row attached to a payment. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentTax {
    pub payment_tax_id: Uuid,
    pub payment_id: Uuid,
    pub tax_rate_id: Uuid,
    pub tax_name_snapshot: String,
    pub tax_rate_snapshot: Decimal,
    pub tax_amount: i64,
}

/// Student covered by a payment, with purchased quantity (e.g. session count).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentPayee {
    pub student_id: Uuid,
    pub quantity: i32,
}

/// Input for inserting a pending payment with its snapshots and payees.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub family_id: Uuid,
    pub payment_type: PaymentType,
    pub currency: Currency,
    pub subtotal_amount: i64,
    pub discount_amount: i64,
    pub tax_amount: i64,
    pub total_amount: i64,
    pub discount_code_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub provider: String,
    pub payees: Vec<PaymentPayee>,
    pub taxes: Vec<TaxSnapshot>,
}
