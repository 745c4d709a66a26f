//! Discount selection and validation.
//!
//! Two-phase protocol. Phase A retrieves and ranks eligible candidates for
//! display; Phase B re-validates the chosen code against current database
//! state and the server-derived subtotal immediately before charge creation.
//! Phase B is fail-open: any ineligibility drops the discount to zero and the
//! checkout proceeds. Usage counters move only when a payment using the code
//! succeeds, through a conditional increment in the repository.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::charges::ChargeCategory;
use crate::models::{
    ChargeLineItem, DiscountCode, DiscountIneligibility, DiscountScope, DiscountType,
    DiscountValidationResult,
};
use crate::money::{Money, MoneyError};

/// The charge a discount is being considered against.
#[derive(Debug, Clone)]
pub struct DiscountContext {
    pub family_id: Uuid,
    pub student_ids: Vec<Uuid>,
    pub category: ChargeCategory,
    /// Server-derived subtotal; client-displayed amounts never reach here.
    pub subtotal: Money,
}

fn has_remaining_uses(code: &DiscountCode) -> bool {
    match code.max_uses {
        Some(cap) => code.current_uses < cap,
        None => true,
    }
}

/// Check every eligibility predicate, returning the first failure.
pub fn eligibility(
    code: &DiscountCode,
    ctx: &DiscountContext,
    now: DateTime<Utc>,
) -> Result<(), DiscountIneligibility> {
    if !code.active {
        return Err(DiscountIneligibility::Inactive);
    }
    if now < code.valid_from {
        return Err(DiscountIneligibility::NotYetValid);
    }
    if let Some(until) = code.valid_until {
        if now > until {
            return Err(DiscountIneligibility::Expired);
        }
    }
    if !has_remaining_uses(code) {
        return Err(DiscountIneligibility::UsageExhausted);
    }
    match DiscountScope::from_string(&code.scope) {
        DiscountScope::Global => {}
        DiscountScope::PerFamily => {
            if code.family_id != Some(ctx.family_id) {
                return Err(DiscountIneligibility::ScopeMismatch);
            }
        }
        DiscountScope::PerStudent => match code.student_id {
            Some(student_id) if ctx.student_ids.contains(&student_id) => {}
            _ => return Err(DiscountIneligibility::ScopeMismatch),
        },
    }
    if !code
        .applicable_to
        .iter()
        .any(|category| category == ctx.category.as_str())
    {
        return Err(DiscountIneligibility::CategoryMismatch);
    }
    let value_ok = match DiscountType::from_string(&code.discount_type) {
        DiscountType::Percentage => {
            code.discount_value >= rust_decimal::Decimal::ZERO
                && code.discount_value <= rust_decimal::Decimal::ONE_HUNDRED
        }
        DiscountType::FixedAmount => code.discount_value >= rust_decimal::Decimal::ZERO,
    };
    if !value_ok {
        return Err(DiscountIneligibility::Malformed);
    }
    Ok(())
}

/// Compute the savings a code yields against a subtotal. Fixed amounts are
/// clamped to the subtotal; percentage values are percentages of it.
pub fn compute_amount(
    code: &DiscountCode,
    subtotal: Money,
) -> Result<Money, DiscountIneligibility> {
    match DiscountType::from_string(&code.discount_type) {
        DiscountType::Percentage => subtotal
            .apply_percent(code.discount_value)
            .map_err(|_| DiscountIneligibility::Malformed),
        DiscountType::FixedAmount => {
            let amount = Money::from_major(code.discount_value, subtotal.currency())
                .map_err(|_| DiscountIneligibility::Malformed)?;
            amount
                .min_value(subtotal)
                .map_err(|_| DiscountIneligibility::Malformed)
        }
    }
}

/// Phase B: authoritative validation of a freshly fetched code.
///
/// Never errors and never blocks a checkout. Every failure comes back as
/// `is_valid: false` with a reason and a zero amount.
pub fn validate(
    found: Option<&DiscountCode>,
    ctx: &DiscountContext,
    now: DateTime<Utc>,
) -> DiscountValidationResult {
    let currency = ctx.subtotal.currency();
    let Some(code) = found else {
        return DiscountValidationResult::invalid(DiscountIneligibility::UnknownCode, currency);
    };
    if let Err(reason) = eligibility(code, ctx, now) {
        tracing::info!(code = %code.code, reason = %reason, "Discount code rejected");
        return DiscountValidationResult::invalid(reason, currency);
    }
    match compute_amount(code, ctx.subtotal) {
        Ok(amount) => DiscountValidationResult::valid(code, amount),
        Err(reason) => {
            tracing::warn!(code = %code.code, reason = %reason, "Discount amount computation failed");
            DiscountValidationResult::invalid(reason, currency)
        }
    }
}

/// A Phase A candidate with its computed savings.
#[derive(Debug, Clone, Serialize)]
pub struct RankedDiscount {
    pub savings: Money,
    pub code: DiscountCode,
}

/// Phase A: filter to eligible codes and rank by savings, descending.
/// Savings are computed against the context subtotal for ranking purposes
/// only; ties break on the code string for determinism.
pub fn rank_candidates(
    codes: Vec<DiscountCode>,
    ctx: &DiscountContext,
    now: DateTime<Utc>,
) -> Vec<RankedDiscount> {
    let mut ranked: Vec<RankedDiscount> = codes
        .into_iter()
        .filter(|code| eligibility(code, ctx, now).is_ok())
        .filter_map(|code| match compute_amount(&code, ctx.subtotal) {
            Ok(savings) => Some(RankedDiscount { savings, code }),
            Err(_) => None,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.savings
            .minor_units()
            .cmp(&a.savings.minor_units())
            .then_with(|| a.code.code.cmp(&b.code.code))
    });
    ranked
}

/// Split a fixed discount across lines proportionally to their gross
/// amounts, largest remainders first, so the allocations sum to the clamped
/// total exactly and no line is discounted below zero.
pub fn allocate_fixed(total: Money, grosses: &[Money]) -> Result<Vec<Money>, MoneyError> {
    let currency = total.currency();
    let mut weights: Vec<i128> = Vec::with_capacity(grosses.len());
    let mut weight_sum: i128 = 0;
    for gross in grosses {
        if gross.currency() != currency {
            return Err(MoneyError::CurrencyMismatch {
                left: currency,
                right: gross.currency(),
            });
        }
        let weight = i128::from(gross.minor_units().max(0));
        weight_sum += weight;
        weights.push(weight);
    }
    if weight_sum == 0 {
        return Ok(grosses.iter().map(|_| Money::zero(currency)).collect());
    }

    let total_minor = i128::from(total.minor_units().max(0)).min(weight_sum);
    let mut floors: Vec<i128> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<i128> = Vec::with_capacity(weights.len());
    for weight in &weights {
        let scaled = total_minor * weight;
        floors.push(scaled / weight_sum);
        remainders.push(scaled % weight_sum);
    }

    let assigned: i128 = floors.iter().sum();
    let mut leftover = total_minor - assigned;
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| remainders[b].cmp(&remainders[a]).then(a.cmp(&b)));

    let mut allocations: Vec<i64> = floors.into_iter().map(|f| f as i64).collect();
    for idx in order {
        if leftover == 0 {
            break;
        }
        allocations[idx] += 1;
        leftover -= 1;
    }
    Ok(allocations
        .into_iter()
        .map(|minor| Money::new(minor, currency))
        .collect())
}

/// Materialize a validated code onto the line items so all rounding stays at
/// the line level: percentage codes become a per-line discount rate, fixed
/// codes an exact per-line allocation of the clamped amount. Lines that
/// already carry a discount are left alone.
pub fn apply_discount(
    items: &mut [ChargeLineItem],
    code: &DiscountCode,
    amount: Money,
) -> Result<(), MoneyError> {
    match DiscountType::from_string(&code.discount_type) {
        DiscountType::Percentage => {
            for item in items.iter_mut() {
                if item.discount_rate.is_none() && item.flat_discount.is_none() {
                    item.discount_rate = Some(code.discount_value);
                }
            }
        }
        DiscountType::FixedAmount => {
            let mut grosses = Vec::with_capacity(items.len());
            for item in items.iter() {
                let gross = if item.discount_rate.is_none() && item.flat_discount.is_none() {
                    item.unit_price.times(item.quantity)?
                } else {
                    Money::zero(amount.currency())
                };
                grosses.push(gross);
            }
            let allocations = allocate_fixed(amount, &grosses)?;
            for (item, allocation) in items.iter_mut().zip(allocations) {
                if allocation.is_positive() {
                    item.flat_discount = Some(allocation);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemType, UsageType};
    use chrono::Duration;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn cad(minor: i64) -> Money {
        Money::new(minor, crate::money::Currency::Cad)
    }

    fn base_code(now: DateTime<Utc>) -> DiscountCode {
        DiscountCode {
            discount_code_id: Uuid::new_v4(),
            code: "WELCOME10".to_string(),
            name: "Welcome discount".to_string(),
            discount_type: DiscountType::Percentage.as_str().to_string(),
            discount_value: Decimal::from(10),
            scope: DiscountScope::Global.as_str().to_string(),
            family_id: None,
            student_id: None,
            applicable_to: vec!["monthly_group".to_string()],
            usage_type: UsageType::Unlimited.as_str().to_string(),
            max_uses: None,
            current_uses: 0,
            valid_from: now - Duration::days(1),
            valid_until: None,
            active: true,
            created_automatically: false,
            created_utc: now - Duration::days(1),
        }
    }

    fn ctx(subtotal: Money) -> DiscountContext {
        DiscountContext {
            family_id: Uuid::new_v4(),
            student_ids: vec![],
            category: ChargeCategory::MonthlyGroup,
            subtotal,
        }
    }

    #[test]
    fn eligible_code_validates_with_computed_amount() {
        let now = Utc::now();
        let code = base_code(now);
        let result = validate(Some(&code), &ctx(cad(20_000)), now);
        assert!(result.is_valid);
        assert_eq!(result.discount_amount, cad(2_000));
        assert_eq!(result.discount_code_id, Some(code.discount_code_id));
        assert!(result.reason.is_none());
    }

    #[test]
    fn unknown_code_fails_open() {
        let result = validate(None, &ctx(cad(20_000)), Utc::now());
        assert!(!result.is_valid);
        assert_eq!(result.reason, Some(DiscountIneligibility::UnknownCode));
        assert!(result.discount_amount.is_zero());
    }

    #[test]
    fn every_ineligibility_reason_fails_open() {
        let now = Utc::now();
        let context = ctx(cad(20_000));

        let mut inactive = base_code(now);
        inactive.active = false;

        let mut not_yet = base_code(now);
        not_yet.valid_from = now + Duration::days(1);

        let mut expired = base_code(now);
        expired.valid_until = Some(now - Duration::hours(1));

        let mut exhausted = base_code(now);
        exhausted.max_uses = Some(3);
        exhausted.current_uses = 3;

        let mut wrong_family = base_code(now);
        wrong_family.scope = DiscountScope::PerFamily.as_str().to_string();
        wrong_family.family_id = Some(Uuid::new_v4());

        let mut wrong_student = base_code(now);
        wrong_student.scope = DiscountScope::PerStudent.as_str().to_string();
        wrong_student.student_id = Some(Uuid::new_v4());

        let mut wrong_category = base_code(now);
        wrong_category.applicable_to = vec!["individual_session".to_string()];

        let mut malformed = base_code(now);
        malformed.discount_value = Decimal::from(250);

        let cases = [
            (inactive, DiscountIneligibility::Inactive),
            (not_yet, DiscountIneligibility::NotYetValid),
            (expired, DiscountIneligibility::Expired),
            (exhausted, DiscountIneligibility::UsageExhausted),
            (wrong_family, DiscountIneligibility::ScopeMismatch),
            (wrong_student, DiscountIneligibility::ScopeMismatch),
            (wrong_category, DiscountIneligibility::CategoryMismatch),
            (malformed, DiscountIneligibility::Malformed),
        ];
        for (code, expected) in cases {
            let result = validate(Some(&code), &context, now);
            assert!(!result.is_valid, "{:?} should be invalid", expected);
            assert_eq!(result.reason, Some(expected));
            assert!(result.discount_amount.is_zero());
        }
    }

    #[test]
    fn per_family_code_validates_for_its_family() {
        let now = Utc::now();
        let mut context = ctx(cad(10_000));
        let mut code = base_code(now);
        code.scope = DiscountScope::PerFamily.as_str().to_string();
        code.family_id = Some(context.family_id);
        assert!(validate(Some(&code), &context, now).is_valid);

        let student_id = Uuid::new_v4();
        context.student_ids = vec![student_id];
        let mut student_code = base_code(now);
        student_code.scope = DiscountScope::PerStudent.as_str().to_string();
        student_code.student_id = Some(student_id);
        assert!(validate(Some(&student_code), &context, now).is_valid);
    }

    #[test]
    fn last_remaining_use_is_still_eligible() {
        let now = Utc::now();
        let mut code = base_code(now);
        code.max_uses = Some(5);
        code.current_uses = 4;
        assert!(eligibility(&code, &ctx(cad(10_000)), now).is_ok());
    }

    #[test]
    fn fixed_amount_is_clamped_to_subtotal() {
        let now = Utc::now();
        let mut code = base_code(now);
        code.discount_type = DiscountType::FixedAmount.as_str().to_string();
        code.discount_value = Decimal::from_str("50.00").unwrap();

        let small = validate(Some(&code), &ctx(cad(3_000)), now);
        assert!(small.is_valid);
        assert_eq!(small.discount_amount, cad(3_000));

        let large = validate(Some(&code), &ctx(cad(20_000)), now);
        assert_eq!(large.discount_amount, cad(5_000));
    }

    #[test]
    fn candidates_rank_by_savings_then_code() {
        let now = Utc::now();
        let context = ctx(cad(20_000));

        let mut ten = base_code(now);
        ten.code = "TEN".to_string();
        let mut fifteen = base_code(now);
        fifteen.code = "FIFTEEN".to_string();
        fifteen.discount_value = Decimal::from(15);
        let mut also_ten = base_code(now);
        also_ten.code = "AAA10".to_string();
        let mut ineligible = base_code(now);
        ineligible.code = "DEAD".to_string();
        ineligible.active = false;

        let ranked = rank_candidates(vec![ten, fifteen, also_ten, ineligible], &context, now);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].code.code, "FIFTEEN");
        assert_eq!(ranked[0].savings, cad(3_000));
        assert_eq!(ranked[1].code.code, "AAA10");
        assert_eq!(ranked[2].code.code, "TEN");
    }

    #[test]
    fn fixed_allocation_sums_exactly() {
        let grosses = vec![cad(10_000), cad(5_000)];
        let allocations = allocate_fixed(cad(2_500), &grosses).unwrap();
        assert_eq!(allocations, vec![cad(1_667), cad(833)]);

        let sum = allocations
            .iter()
            .try_fold(cad(0), |acc, a| acc.try_add(*a))
            .unwrap();
        assert_eq!(sum, cad(2_500));
    }

    #[test]
    fn fixed_allocation_skips_zero_lines_and_clamps() {
        let grosses = vec![cad(0), cad(4_000)];
        let allocations = allocate_fixed(cad(5_000), &grosses).unwrap();
        assert_eq!(allocations[0], cad(0));
        // clamped to the allocatable weight
        assert_eq!(allocations[1], cad(4_000));
    }

    #[test]
    fn apply_percentage_sets_rate_on_undiscounted_lines_only() {
        let now = Utc::now();
        let code = base_code(now);
        let mut items = vec![
            ChargeLineItem::new("Plain", ItemType::Service, 1, cad(10_000)),
            ChargeLineItem::new("Already discounted", ItemType::Service, 1, cad(10_000))
                .with_discount_rate(Decimal::from(5)),
        ];
        apply_discount(&mut items, &code, cad(1_000)).unwrap();
        assert_eq!(items[0].discount_rate, Some(Decimal::from(10)));
        assert_eq!(items[1].discount_rate, Some(Decimal::from(5)));
    }

    #[test]
    fn apply_fixed_allocates_flat_discounts() {
        let now = Utc::now();
        let mut code = base_code(now);
        code.discount_type = DiscountType::FixedAmount.as_str().to_string();
        code.discount_value = Decimal::from_str("25.00").unwrap();

        let mut items = vec![
            ChargeLineItem::new("A", ItemType::Service, 1, cad(10_000)),
            ChargeLineItem::new("B", ItemType::Service, 1, cad(5_000)),
        ];
        apply_discount(&mut items, &code, cad(2_500)).unwrap();
        assert_eq!(items[0].flat_discount, Some(cad(1_667)));
        assert_eq!(items[1].flat_discount, Some(cad(833)));
    }
}
