//! Charge computation: line-item calculator, pricing options, tax resolution.

pub mod calculator;
pub mod options;
pub mod tax;

pub use calculator::{compute_charges, ChargeBreakdown, LineComputation};
pub use options::{enrollment_line_items, ChargeCategory, ChargeOption};
pub use tax::{aggregate_snapshots, resolve_tax_rates};

use dojo_core::error::AppError;
use thiserror::Error;

use crate::money::MoneyError;

/// Failures from charge computation.
#[derive(Debug, Error)]
pub enum ChargeError {
    /// Bad input at the calculator boundary. Rejected, never clamped.
    #[error("invalid line item: {0}")]
    InvalidLineItem(String),

    /// Tax rates could not be resolved. Blocks charge creation; the engine
    /// never falls back to charging zero tax.
    #[error("tax resolution failed: {0}")]
    TaxResolutionFailed(String),

    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl From<ChargeError> for AppError {
    fn from(err: ChargeError) -> Self {
        match err {
            ChargeError::InvalidLineItem(msg) => {
                AppError::UnprocessableEntity(anyhow::anyhow!("invalid line item: {}", msg))
            }
            ChargeError::TaxResolutionFailed(msg) => {
                tracing::error!(error = %msg, "Tax resolution failed, blocking charge");
                AppError::ServiceUnavailable
            }
            ChargeError::Money(e) => AppError::InternalError(anyhow::anyhow!(e)),
        }
    }
}
