//! Line-item calculator.
//!
//! Each line is computed in order: gross, discount, discounted amount, one
//! tax amount per applicable rate, line total. Rounding happens at the line
//! level only. The invoice total is the sum of line totals and is never
//! recomputed from separately rounded aggregates, so `total == sum of line
//! totals` holds exactly for any input.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::charges::ChargeError;
use crate::models::{ChargeLineItem, ItemType, ServicePeriod, TaxSnapshot};
use crate::money::{Currency, Money};

/// Computed amounts for one line.
#[derive(Debug, Clone, Serialize)]
pub struct LineComputation {
    pub description: String,
    pub item_type: ItemType,
    pub quantity: i64,
    pub unit_price: Money,
    pub gross_amount: Money,
    pub discount_amount: Money,
    pub discounted_amount: Money,
    pub taxes: Vec<TaxSnapshot>,
    pub tax_amount: Money,
    pub line_total: Money,
    pub service_period: Option<ServicePeriod>,
}

/// Full charge breakdown: per-line computations plus invoice aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeBreakdown {
    pub currency: Currency,
    pub lines: Vec<LineComputation>,
    pub subtotal: Money,
    pub discount_total: Money,
    pub tax_total: Money,
    pub total: Money,
}

fn validate_item(item: &ChargeLineItem, currency: Currency) -> Result<(), ChargeError> {
    if item.quantity < 0 {
        return Err(ChargeError::InvalidLineItem(format!(
            "negative quantity {} on '{}'",
            item.quantity, item.description
        )));
    }
    if item.unit_price.is_negative() {
        return Err(ChargeError::InvalidLineItem(format!(
            "negative unit price on '{}'",
            item.description
        )));
    }
    if item.unit_price.currency() != currency {
        return Err(ChargeError::InvalidLineItem(format!(
            "line '{}' is priced in {}, charge currency is {}",
            item.description,
            item.unit_price.currency(),
            currency
        )));
    }
    if item.discount_rate.is_some() && item.flat_discount.is_some() {
        return Err(ChargeError::InvalidLineItem(format!(
            "line '{}' carries both a discount rate and a flat discount",
            item.description
        )));
    }
    if let Some(rate) = item.discount_rate {
        if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
            return Err(ChargeError::InvalidLineItem(format!(
                "discount rate {} outside 0..=100 on '{}'",
                rate, item.description
            )));
        }
    }
    if let Some(flat) = item.flat_discount {
        if flat.currency() != currency {
            return Err(ChargeError::InvalidLineItem(format!(
                "flat discount currency mismatch on '{}'",
                item.description
            )));
        }
        if flat.is_negative() {
            return Err(ChargeError::InvalidLineItem(format!(
                "negative flat discount on '{}'",
                item.description
            )));
        }
    }
    for tax in &item.tax_rates {
        if tax.rate < Decimal::ZERO || tax.rate > Decimal::ONE {
            return Err(ChargeError::InvalidLineItem(format!(
                "tax rate {} outside 0..=1 on '{}'",
                tax.rate, item.description
            )));
        }
    }
    Ok(())
}

fn compute_line(item: &ChargeLineItem, currency: Currency) -> Result<LineComputation, ChargeError> {
    let gross_amount = item.unit_price.times(item.quantity)?;

    let discount_amount = if let Some(rate) = item.discount_rate {
        gross_amount.apply_percent(rate)?
    } else if let Some(flat) = item.flat_discount {
        flat
    } else {
        Money::zero(currency)
    };
    if discount_amount.cmp_value(&gross_amount)? == std::cmp::Ordering::Greater {
        return Err(ChargeError::InvalidLineItem(format!(
            "discount exceeds line amount on '{}'",
            item.description
        )));
    }
    let discounted_amount = gross_amount.try_sub(discount_amount)?;

    // Tax is computed on the post-discount amount, one rounded value per rate.
    let mut taxes = Vec::with_capacity(item.tax_rates.len());
    let mut tax_amount = Money::zero(currency);
    for rate in &item.tax_rates {
        let amount = discounted_amount.apply_rate(rate.rate)?;
        tax_amount = tax_amount.try_add(amount)?;
        taxes.push(TaxSnapshot {
            tax_rate_id: rate.tax_rate_id,
            tax_name_snapshot: rate.name.clone(),
            tax_rate_snapshot: rate.rate,
            tax_amount: amount,
        });
    }

    let line_total = discounted_amount.try_add(tax_amount)?;

    Ok(LineComputation {
        description: item.description.clone(),
        item_type: item.item_type,
        quantity: item.quantity,
        unit_price: item.unit_price,
        gross_amount,
        discount_amount,
        discounted_amount,
        taxes,
        tax_amount,
        line_total,
        service_period: item.service_period,
    })
}

/// Compute the full breakdown for an ordered set of line items.
///
/// Zero-quantity and zero-price lines contribute zero everywhere but stay in
/// the output. Out-of-range rates, negative quantities, and cross-currency
/// lines are rejected with [`ChargeError::InvalidLineItem`].
pub fn compute_charges(
    items: &[ChargeLineItem],
    currency: Currency,
) -> Result<ChargeBreakdown, ChargeError> {
    for item in items {
        validate_item(item, currency)?;
    }

    let mut lines = Vec::with_capacity(items.len());
    let mut subtotal = Money::zero(currency);
    let mut discount_total = Money::zero(currency);
    let mut tax_total = Money::zero(currency);
    let mut total = Money::zero(currency);

    for item in items {
        let line = compute_line(item, currency)?;
        subtotal = subtotal.try_add(line.gross_amount)?;
        discount_total = discount_total.try_add(line.discount_amount)?;
        tax_total = tax_total.try_add(line.tax_amount)?;
        total = total.try_add(line.line_total)?;
        lines.push(line);
    }

    Ok(ChargeBreakdown {
        currency,
        lines,
        subtotal,
        discount_total,
        tax_total,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppliedTaxRate;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use uuid::Uuid;

    fn cad(minor: i64) -> Money {
        Money::new(minor, Currency::Cad)
    }

    fn tax(name: &str, rate: &str) -> AppliedTaxRate {
        AppliedTaxRate {
            tax_rate_id: Uuid::new_v4(),
            name: name.to_string(),
            rate: Decimal::from_str(rate).unwrap(),
        }
    }

    #[test]
    fn single_line_with_discount_and_tax() {
        // $120.00 x1, 10% discount, 13% tax.
        let items = vec![ChargeLineItem::new("Monthly fee", ItemType::Service, 1, cad(12_000))
            .with_discount_rate(Decimal::from(10))
            .with_tax_rates(vec![tax("HST", "0.13")])];

        let breakdown = compute_charges(&items, Currency::Cad).unwrap();
        let line = &breakdown.lines[0];
        assert_eq!(line.gross_amount, cad(12_000));
        assert_eq!(line.discount_amount, cad(1_200));
        assert_eq!(line.discounted_amount, cad(10_800));
        assert_eq!(line.tax_amount, cad(1_404));
        assert_eq!(line.line_total, cad(12_204));
        assert_eq!(breakdown.subtotal, cad(12_000));
        assert_eq!(breakdown.discount_total, cad(1_200));
        assert_eq!(breakdown.tax_total, cad(1_404));
        assert_eq!(breakdown.total, cad(12_204));
    }

    #[test]
    fn multiple_tax_rates_round_independently() {
        // $10.00 at GST 5% + PST 7%: 50 + 70, not round(10.00 * 12%).
        let items = vec![ChargeLineItem::new("Gear", ItemType::Product, 1, cad(1_000))
            .with_tax_rates(vec![tax("GST", "0.05"), tax("PST", "0.07")])];

        let breakdown = compute_charges(&items, Currency::Cad).unwrap();
        let line = &breakdown.lines[0];
        assert_eq!(line.taxes.len(), 2);
        assert_eq!(line.taxes[0].tax_amount, cad(50));
        assert_eq!(line.taxes[1].tax_amount, cad(70));
        assert_eq!(line.tax_amount, cad(120));
        assert_eq!(breakdown.total, cad(1_120));
    }

    #[test]
    fn zero_quantity_lines_stay_in_output() {
        let items = vec![
            ChargeLineItem::new("Waived fee", ItemType::Fee, 0, cad(5_000)),
            ChargeLineItem::new("Free trial", ItemType::Service, 1, cad(0)),
        ];
        let breakdown = compute_charges(&items, Currency::Cad).unwrap();
        assert_eq!(breakdown.lines.len(), 2);
        assert_eq!(breakdown.subtotal, cad(0));
        assert_eq!(breakdown.total, cad(0));
    }

    #[test]
    fn empty_input_yields_zero_breakdown() {
        let breakdown = compute_charges(&[], Currency::Cad).unwrap();
        assert!(breakdown.lines.is_empty());
        assert_eq!(breakdown.subtotal, cad(0));
        assert_eq!(breakdown.discount_total, cad(0));
        assert_eq!(breakdown.tax_total, cad(0));
        assert_eq!(breakdown.total, cad(0));
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let items = vec![ChargeLineItem::new("Bad", ItemType::Service, -1, cad(1_000))];
        let err = compute_charges(&items, Currency::Cad).unwrap_err();
        assert!(matches!(err, ChargeError::InvalidLineItem(_)));
    }

    #[test]
    fn out_of_range_rates_are_rejected_not_clamped() {
        let over_discount = vec![ChargeLineItem::new("Bad", ItemType::Service, 1, cad(1_000))
            .with_discount_rate(Decimal::from(101))];
        assert!(matches!(
            compute_charges(&over_discount, Currency::Cad),
            Err(ChargeError::InvalidLineItem(_))
        ));

        let negative_discount = vec![ChargeLineItem::new("Bad", ItemType::Service, 1, cad(1_000))
            .with_discount_rate(Decimal::from(-5))];
        assert!(matches!(
            compute_charges(&negative_discount, Currency::Cad),
            Err(ChargeError::InvalidLineItem(_))
        ));

        let over_tax = vec![ChargeLineItem::new("Bad", ItemType::Service, 1, cad(1_000))
            .with_tax_rates(vec![tax("Broken", "1.5")])];
        assert!(matches!(
            compute_charges(&over_tax, Currency::Cad),
            Err(ChargeError::InvalidLineItem(_))
        ));
    }

    #[test]
    fn mixed_currencies_are_rejected() {
        let items = vec![
            ChargeLineItem::new("CAD line", ItemType::Service, 1, cad(1_000)),
            ChargeLineItem::new("USD line", ItemType::Service, 1, Money::new(1_000, Currency::Usd)),
        ];
        assert!(matches!(
            compute_charges(&items, Currency::Cad),
            Err(ChargeError::InvalidLineItem(_))
        ));
    }

    #[test]
    fn rate_and_flat_discount_together_are_rejected() {
        let items = vec![ChargeLineItem::new("Bad", ItemType::Service, 1, cad(1_000))
            .with_discount_rate(Decimal::from(10))
            .with_flat_discount(cad(100))];
        assert!(matches!(
            compute_charges(&items, Currency::Cad),
            Err(ChargeError::InvalidLineItem(_))
        ));
    }

    #[test]
    fn flat_discount_larger_than_line_is_rejected() {
        let items = vec![ChargeLineItem::new("Bad", ItemType::Service, 1, cad(1_000))
            .with_flat_discount(cad(1_001))];
        assert!(matches!(
            compute_charges(&items, Currency::Cad),
            Err(ChargeError::InvalidLineItem(_))
        ));
    }

    #[test]
    fn flat_discount_reduces_taxable_amount() {
        let items = vec![ChargeLineItem::new("Line", ItemType::Service, 1, cad(10_000))
            .with_flat_discount(cad(2_500))
            .with_tax_rates(vec![tax("HST", "0.13")])];
        let breakdown = compute_charges(&items, Currency::Cad).unwrap();
        let line = &breakdown.lines[0];
        assert_eq!(line.discounted_amount, cad(7_500));
        assert_eq!(line.tax_amount, cad(975));
        assert_eq!(breakdown.total, cad(8_475));
    }

    #[test]
    fn total_equals_sum_of_line_totals_for_random_inputs() {
        // Randomized no-penny-drift check over awkward prices and rates.
        let mut seed: u64 = 0xb111;
        let mut next = move || {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (seed >> 33) as i64
        };

        for _ in 0..100 {
            let line_count = (next().rem_euclid(6) + 1) as usize;
            let mut items = Vec::with_capacity(line_count);
            for _ in 0..line_count {
                let price = cad(next().rem_euclid(50_000));
                let quantity = next().rem_euclid(5);
                let mut item =
                    ChargeLineItem::new("Line", ItemType::Service, quantity, price);
                if next() % 2 == 0 {
                    item = item.with_discount_rate(Decimal::from(next().rem_euclid(101)));
                }
                if next() % 2 == 0 {
                    item = item.with_tax_rates(vec![
                        tax("GST", "0.05"),
                        tax("PST", "0.07"),
                    ]);
                }
                items.push(item);
            }

            let breakdown = compute_charges(&items, Currency::Cad).unwrap();
            let summed = breakdown
                .lines
                .iter()
                .try_fold(cad(0), |acc, line| acc.try_add(line.line_total))
                .unwrap();
            assert_eq!(breakdown.total, summed);

            let gross_sum = breakdown
                .lines
                .iter()
                .try_fold(cad(0), |acc, line| acc.try_add(line.gross_amount))
                .unwrap();
            assert_eq!(breakdown.subtotal, gross_sum);
        }
    }
}
