//! Discount selection (Phase A) and validation (Phase B) endpoints.
//!
//! Both are advisory for checkout UIs: the session endpoint re-validates the
//! chosen code against the server-derived subtotal before anything is billed.

use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use dojo_core::error::AppError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::charges::ChargeCategory;
use crate::discounts::{self, DiscountContext};
use crate::money::{Currency, Money};
use crate::services::metrics::DISCOUNT_VALIDATIONS_TOTAL;
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct EligibleDiscountsRequest {
    pub family_id: Uuid,
    #[serde(default)]
    pub student_ids: Vec<Uuid>,
    pub category: ChargeCategory,
    /// Display subtotal in minor units, used to estimate savings for ranking.
    pub subtotal: i64,
    pub currency: Currency,
}

#[derive(Debug, Serialize)]
pub struct EligibleDiscountResponse {
    pub discount_code_id: Uuid,
    pub code: String,
    pub name: String,
    pub discount_type: String,
    pub discount_value: Decimal,
    pub savings: i64,
    pub currency: Currency,
}

/// Phase A: candidates for this family and charge, best savings first.
pub async fn eligible_discounts(
    State(state): State<AppState>,
    Json(req): Json<EligibleDiscountsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let candidates = state
        .db
        .eligible_discounts(req.family_id, &req.student_ids, req.category.as_str(), now)
        .await?;

    let ctx = DiscountContext {
        family_id: req.family_id,
        student_ids: req.student_ids,
        category: req.category,
        subtotal: Money::new(req.subtotal, req.currency),
    };
    let ranked = discounts::rank_candidates(candidates, &ctx, now);

    let response: Vec<EligibleDiscountResponse> = ranked
        .into_iter()
        .map(|candidate| EligibleDiscountResponse {
            discount_code_id: candidate.code.discount_code_id,
            code: candidate.code.code,
            name: candidate.code.name,
            discount_type: candidate.code.discount_type,
            discount_value: candidate.code.discount_value,
            savings: candidate.savings.minor_units(),
            currency: candidate.savings.currency(),
        })
        .collect();

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ValidateDiscountRequest {
    pub code: String,
    pub family_id: Uuid,
    #[serde(default)]
    pub student_ids: Vec<Uuid>,
    pub category: ChargeCategory,
    pub subtotal: i64,
    pub currency: Currency,
}

/// Phase B preview: never errors on an ineligible code, the result says why.
pub async fn validate_discount(
    State(state): State<AppState>,
    Json(req): Json<ValidateDiscountRequest>,
) -> Result<impl IntoResponse, AppError> {
    let found = state.db.find_discount_by_code(&req.code).await?;
    let ctx = DiscountContext {
        family_id: req.family_id,
        student_ids: req.student_ids,
        category: req.category,
        subtotal: Money::new(req.subtotal, req.currency),
    };
    let result = discounts::validate(found.as_ref(), &ctx, Utc::now());
    DISCOUNT_VALIDATIONS_TOTAL
        .with_label_values(&[if result.is_valid { "valid" } else { "invalid" }])
        .inc();

    Ok(Json(result))
}
