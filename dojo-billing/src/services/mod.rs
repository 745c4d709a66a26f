pub mod database;
pub mod metrics;
pub mod sweeper;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics};
pub use sweeper::PendingPaymentSweeper;
