//! Discount code models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::money::{Currency, Money};

/// How a discount's value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::FixedAmount => "fixed_amount",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "fixed_amount" => DiscountType::FixedAmount,
            _ => DiscountType::Percentage,
        }
    }
}

/// The granularity at which a code's eligibility is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountScope {
    PerFamily,
    PerStudent,
    Global,
}

impl DiscountScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountScope::PerFamily => "per_family",
            DiscountScope::PerStudent => "per_student",
            DiscountScope::Global => "global",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "per_family" => DiscountScope::PerFamily,
            "per_student" => DiscountScope::PerStudent,
            _ => DiscountScope::Global,
        }
    }
}

/// How many redemptions a code allows. Maps onto `max_uses` at issue time:
/// one-time codes get `max_uses = 1`, per-student codes get one use per
/// issued student, unlimited codes leave `max_uses` null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageType {
    OneTime,
    PerStudent,
    Unlimited,
}

impl UsageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageType::OneTime => "one_time",
            UsageType::PerStudent => "per_student",
            UsageType::Unlimited => "unlimited",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "per_student" => UsageType::PerStudent,
            "unlimited" => UsageType::Unlimited,
            _ => UsageType::OneTime,
        }
    }
}

/// Discount code definition.
///
/// `code` is compared case-insensitively; the database enforces uniqueness on
/// `lower(code)`. `current_uses` only moves through the conditional increment
/// in the repository, and only when a payment using the code succeeds.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiscountCode {
    pub discount_code_id: Uuid,
    pub code: String,
    pub name: String,
    pub discount_type: String,
    pub discount_value: Decimal,
    pub scope: String,
    pub family_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub applicable_to: Vec<String>,
    pub usage_type: String,
    pub max_uses: Option<i32>,
    pub current_uses: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_automatically: bool,
    pub created_utc: DateTime<Utc>,
}

/// Why a code failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountIneligibility {
    UnknownCode,
    Inactive,
    NotYetValid,
    Expired,
    UsageExhausted,
    ScopeMismatch,
    CategoryMismatch,
    Malformed,
}

impl fmt::Display for DiscountIneligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DiscountIneligibility::UnknownCode => "code not found",
            DiscountIneligibility::Inactive => "code is no longer active",
            DiscountIneligibility::NotYetValid => "code is not valid yet",
            DiscountIneligibility::Expired => "code has expired",
            DiscountIneligibility::UsageExhausted => "code has no remaining uses",
            DiscountIneligibility::ScopeMismatch => "code is not issued to this family or student",
            DiscountIneligibility::CategoryMismatch => "code does not apply to this charge",
            DiscountIneligibility::Malformed => "code configuration is invalid",
        };
        f.write_str(msg)
    }
}

/// Outcome of validating a code against an authoritative subtotal.
///
/// Ephemeral: built fresh on every call and never persisted or cached,
/// because eligibility depends on live usage counters and the exact subtotal
/// being validated against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountValidationResult {
    pub is_valid: bool,
    pub discount_code_id: Option<Uuid>,
    pub code: Option<String>,
    pub name: Option<String>,
    pub discount_amount: Money,
    pub reason: Option<DiscountIneligibility>,
}

impl DiscountValidationResult {
    pub fn valid(code: &DiscountCode, amount: Money) -> Self {
        Self {
            is_valid: true,
            discount_code_id: Some(code.discount_code_id),
            code: Some(code.code.clone()),
            name: Some(code.name.clone()),
            discount_amount: amount,
            reason: None,
        }
    }

    pub fn invalid(reason: DiscountIneligibility, currency: Currency) -> Self {
        Self {
            is_valid: false,
            discount_code_id: None,
            code: None,
            name: None,
            discount_amount: Money::zero(currency),
            reason: Some(reason),
        }
    }
}
