//! Tax resolution and snapshot aggregation.

use crate::charges::calculator::LineComputation;
use crate::charges::{ChargeCategory, ChargeError};
use crate::models::{AppliedTaxRate, TaxSnapshot};
use crate::money::MoneyError;
use crate::services::Database;

/// Resolve the active tax rates applicable to a charge category, in
/// deterministic (name) order.
///
/// A lookup failure is [`ChargeError::TaxResolutionFailed`] and blocks the
/// charge; the engine never falls back to charging zero tax. An empty result
/// is a legitimate zero-tax configuration, not a failure.
pub async fn resolve_tax_rates(
    db: &Database,
    category: ChargeCategory,
) -> Result<Vec<AppliedTaxRate>, ChargeError> {
    let rows = db
        .applicable_tax_rates(category.as_str())
        .await
        .map_err(|e| ChargeError::TaxResolutionFailed(e.to_string()))?;
    Ok(rows.iter().map(AppliedTaxRate::from).collect())
}

/// Merge per-line snapshots into one row per tax rate, amounts summed.
///
/// Amounts were already rounded at the line level; summing them keeps the
/// merged rows equal to the breakdown's tax total exactly.
pub fn aggregate_snapshots(lines: &[LineComputation]) -> Result<Vec<TaxSnapshot>, MoneyError> {
    let mut merged: Vec<TaxSnapshot> = Vec::new();
    for line in lines {
        for snapshot in &line.taxes {
            match merged
                .iter_mut()
                .find(|s| s.tax_rate_id == snapshot.tax_rate_id)
            {
                Some(existing) => {
                    existing.tax_amount = existing.tax_amount.try_add(snapshot.tax_amount)?;
                }
                None => merged.push(snapshot.clone()),
            }
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charges::compute_charges;
    use crate::models::{ChargeLineItem, ItemType};
    use crate::money::{Currency, Money};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use uuid::Uuid;

    #[test]
    fn snapshots_merge_per_rate_across_lines() {
        let hst = AppliedTaxRate {
            tax_rate_id: Uuid::new_v4(),
            name: "HST".to_string(),
            rate: Decimal::from_str("0.13").unwrap(),
        };
        let levy = AppliedTaxRate {
            tax_rate_id: Uuid::new_v4(),
            name: "Facility levy".to_string(),
            rate: Decimal::from_str("0.01").unwrap(),
        };

        let items = vec![
            ChargeLineItem::new("A", ItemType::Service, 1, Money::new(10_000, Currency::Cad))
                .with_tax_rates(vec![hst.clone(), levy.clone()]),
            ChargeLineItem::new("B", ItemType::Service, 1, Money::new(5_000, Currency::Cad))
                .with_tax_rates(vec![hst.clone()]),
        ];
        let breakdown = compute_charges(&items, Currency::Cad).unwrap();
        let merged = aggregate_snapshots(&breakdown.lines).unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].tax_rate_id, hst.tax_rate_id);
        // 1300 from the first line + 650 from the second.
        assert_eq!(merged[0].tax_amount, Money::new(1_950, Currency::Cad));
        assert_eq!(merged[1].tax_rate_id, levy.tax_rate_id);
        assert_eq!(merged[1].tax_amount, Money::new(100, Currency::Cad));

        let summed = merged
            .iter()
            .try_fold(Money::zero(Currency::Cad), |acc, s| {
                acc.try_add(s.tax_amount)
            })
            .unwrap();
        assert_eq!(summed, breakdown.tax_total);
    }

    #[test]
    fn no_taxes_yields_no_snapshots() {
        let items = vec![ChargeLineItem::new(
            "A",
            ItemType::Service,
            1,
            Money::new(10_000, Currency::Cad),
        )];
        let breakdown = compute_charges(&items, Currency::Cad).unwrap();
        assert!(aggregate_snapshots(&breakdown.lines).unwrap().is_empty());
    }
}
