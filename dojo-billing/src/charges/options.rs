//! Charge options and enrollment-based pricing derivation.
//!
//! The amounts actually billed are always derived here from the enrollment
//! fee schedule on the server. Client-supplied totals are display-only and
//! never reach a payment row.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::charges::ChargeError;
use crate::models::{
    AppliedTaxRate, ChargeLineItem, Enrollment, ItemType, PaymentType, ServicePeriod, Student,
};

/// Charge category tags used by discount and tax applicability rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeCategory {
    MonthlyGroup,
    YearlyGroup,
    IndividualSession,
    EventRegistration,
    InvoicePayment,
}

impl ChargeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeCategory::MonthlyGroup => "monthly_group",
            ChargeCategory::YearlyGroup => "yearly_group",
            ChargeCategory::IndividualSession => "individual_session",
            ChargeCategory::EventRegistration => "event_registration",
            ChargeCategory::InvoicePayment => "invoice_payment",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "yearly_group" => ChargeCategory::YearlyGroup,
            "individual_session" => ChargeCategory::IndividualSession,
            "event_registration" => ChargeCategory::EventRegistration,
            "invoice_payment" => ChargeCategory::InvoicePayment,
            _ => ChargeCategory::MonthlyGroup,
        }
    }
}

/// What the family chose to pay for.
///
/// Event registrations are billed through invoices issued by the events side
/// of the platform, so they arrive here as `InvoicePayment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChargeOption {
    Monthly,
    Yearly,
    IndividualSessions { quantity: i64 },
    InvoicePayment { invoice_id: Uuid },
}

impl ChargeOption {
    pub fn category(&self) -> ChargeCategory {
        match self {
            ChargeOption::Monthly => ChargeCategory::MonthlyGroup,
            ChargeOption::Yearly => ChargeCategory::YearlyGroup,
            ChargeOption::IndividualSessions { .. } => ChargeCategory::IndividualSession,
            ChargeOption::InvoicePayment { .. } => ChargeCategory::InvoicePayment,
        }
    }

    pub fn payment_type(&self) -> PaymentType {
        match self {
            ChargeOption::Monthly => PaymentType::MonthlySubscription,
            ChargeOption::Yearly => PaymentType::YearlySubscription,
            ChargeOption::IndividualSessions { .. } => PaymentType::IndividualSession,
            ChargeOption::InvoicePayment { .. } => PaymentType::InvoicePayment,
        }
    }

    /// Per-payee purchased quantity recorded on the payment row.
    ///
    /// The column is 32-bit; a session count that does not fit is rejected
    /// here rather than truncated on the way into the insert.
    pub fn payee_quantity(&self) -> Result<i32, ChargeError> {
        match self {
            ChargeOption::IndividualSessions { quantity } => {
                i32::try_from(*quantity).map_err(|_| {
                    ChargeError::InvalidLineItem(format!(
                        "session quantity {} out of range",
                        quantity
                    ))
                })
            }
            _ => Ok(1),
        }
    }
}

fn month_period(today: NaiveDate) -> Option<ServicePeriod> {
    let start = today.with_day(1)?;
    let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
    Some(ServicePeriod { start, end })
}

fn year_period(today: NaiveDate) -> Option<ServicePeriod> {
    let end = today.checked_add_months(Months::new(12))?.pred_opt()?;
    Some(ServicePeriod { start: today, end })
}

fn period_for(option: &ChargeOption, today: NaiveDate) -> Result<Option<ServicePeriod>, ChargeError> {
    let period = match option {
        ChargeOption::Monthly => Some(
            month_period(today)
                .ok_or_else(|| ChargeError::InvalidLineItem("service period out of range".into()))?,
        ),
        ChargeOption::Yearly => Some(
            year_period(today)
                .ok_or_else(|| ChargeError::InvalidLineItem("service period out of range".into()))?,
        ),
        _ => None,
    };
    Ok(period)
}

/// Derive one line item per selected student from the enrollment fee
/// schedule. Applicable tax rates are attached to every line.
pub fn enrollment_line_items(
    option: &ChargeOption,
    roster: &[(Student, Enrollment)],
    tax_rates: &[AppliedTaxRate],
    today: NaiveDate,
) -> Result<Vec<ChargeLineItem>, ChargeError> {
    let period = period_for(option, today)?;

    let mut items = Vec::with_capacity(roster.len());
    for (student, enrollment) in roster {
        let currency = enrollment
            .currency
            .parse()
            .map_err(|_| ChargeError::InvalidLineItem(format!(
                "enrollment {} has unknown currency {}",
                enrollment.enrollment_id, enrollment.currency
            )))?;
        let (description, quantity, unit_minor) = match option {
            ChargeOption::Monthly => (
                format!(
                    "{} monthly fee: {} {}",
                    enrollment.program_name, student.first_name, student.last_name
                ),
                1,
                enrollment.monthly_fee,
            ),
            ChargeOption::Yearly => (
                format!(
                    "{} yearly fee: {} {}",
                    enrollment.program_name, student.first_name, student.last_name
                ),
                1,
                enrollment.yearly_fee,
            ),
            ChargeOption::IndividualSessions { quantity } => (
                format!(
                    "{} individual sessions: {} {}",
                    enrollment.program_name, student.first_name, student.last_name
                ),
                *quantity,
                enrollment.individual_session_fee,
            ),
            ChargeOption::InvoicePayment { .. } => {
                return Err(ChargeError::InvalidLineItem(
                    "invoice payments are priced from the invoice, not from enrollments".into(),
                ));
            }
        };

        let mut item = ChargeLineItem::new(
            description,
            ItemType::Service,
            quantity,
            crate::money::Money::new(unit_minor, currency),
        )
        .with_tax_rates(tax_rates.to_vec());
        if let Some(period) = period {
            item = item.with_service_period(period);
        }
        items.push(item);
    }
    Ok(items)
}
