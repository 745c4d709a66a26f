//! Chargeable line items.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::tax_rate::AppliedTaxRate;
use crate::money::Money;

/// Line item classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Service,
    Product,
    Fee,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Service => "service",
            ItemType::Product => "product",
            ItemType::Fee => "fee",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "product" => ItemType::Product,
            "fee" => ItemType::Fee,
            _ => ItemType::Service,
        }
    }
}

/// Service window a charge covers (e.g. the month of a subscription).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One priced entry within a charge request.
///
/// `discount_rate` is a percentage in `0..=100`; `flat_discount` is an exact
/// pre-allocated amount. A line carries at most one of the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeLineItem {
    pub description: String,
    pub item_type: ItemType,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount_rate: Option<Decimal>,
    pub flat_discount: Option<Money>,
    pub tax_rates: Vec<AppliedTaxRate>,
    pub service_period: Option<ServicePeriod>,
}

impl ChargeLineItem {
    pub fn new(
        description: impl Into<String>,
        item_type: ItemType,
        quantity: i64,
        unit_price: Money,
    ) -> Self {
        Self {
            description: description.into(),
            item_type,
            quantity,
            unit_price,
            discount_rate: None,
            flat_discount: None,
            tax_rates: Vec::new(),
            service_period: None,
        }
    }

    pub fn with_discount_rate(mut self, rate: Decimal) -> Self {
        self.discount_rate = Some(rate);
        self
    }

    pub fn with_flat_discount(mut self, amount: Money) -> Self {
        self.flat_discount = Some(amount);
        self
    }

    pub fn with_tax_rates(mut self, rates: Vec<AppliedTaxRate>) -> Self {
        self.tax_rates = rates;
        self
    }

    pub fn with_service_period(mut self, period: ServicePeriod) -> Self {
        self.service_period = Some(period);
        self
    }
}
