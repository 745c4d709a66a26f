//! Tax rate model and payment-time snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::money::Money;

/// Tax rate configuration. `rate` is a fraction (0.13 for 13%);
/// `applies_to` holds charge category tags.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaxRate {
    pub tax_rate_id: Uuid,
    pub name: String,
    pub rate: Decimal,
    pub applies_to: Vec<String>,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

/// A rate as applied to a single charge, detached from configuration so
/// later edits to the `tax_rates` table cannot reach in-flight calculations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTaxRate {
    pub tax_rate_id: Uuid,
    pub name: String,
    pub rate: Decimal,
}

impl From<&TaxRate> for AppliedTaxRate {
    fn from(rate: &TaxRate) -> Self {
        Self {
            tax_rate_id: rate.tax_rate_id,
            name: rate.name.clone(),
            rate: rate.rate,
        }
    }
}

/// Value copy frozen onto a payment at creation time.
///
/// Inserted atomically with the payment row and never updated; edits to the
/// underlying tax rate must not alter persisted snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxSnapshot {
    pub tax_rate_id: Uuid,
    pub tax_name_snapshot: String,
    pub tax_rate_snapshot: Decimal,
    pub tax_amount: Money,
}
