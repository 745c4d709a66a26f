//! dojo-billing: billing and payment orchestration for the dojo platform.
//!
//! Prices charges from enrollment data, applies discount codes through a
//! two-phase validation protocol, snapshots applicable taxes, and drives
//! hosted checkout sessions on an interchangeable payment provider through
//! to a confirmed payment.

pub mod charges;
pub mod config;
pub mod confirmation;
pub mod discounts;
pub mod handlers;
pub mod models;
pub mod money;
pub mod providers;
pub mod services;
pub mod startup;

pub use startup::{Application, AppState};
