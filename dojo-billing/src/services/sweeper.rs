//! Background sweeper for abandoned pending payments.
//!
//! A pending payment with no provider session means the checkout call failed
//! after the row was written. No webhook will ever settle it, so the sweeper
//! fails such rows once they are older than the configured age. Pending rows
//! that do carry a session are left alone; the provider can still confirm
//! them.

use crate::services::database::Database;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct PendingPaymentSweeper {
    db: Database,
    interval: Duration,
    max_age: ChronoDuration,
}

impl PendingPaymentSweeper {
    pub fn new(db: Database, interval: Duration, max_age_secs: i64) -> Self {
        Self {
            db,
            interval,
            max_age: ChronoDuration::seconds(max_age_secs),
        }
    }

    /// Run until the token is cancelled, sweeping once per interval.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.max_age.num_seconds(),
            "Starting pending payment sweeper"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Pending payment sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    async fn sweep_once(&self) {
        let cutoff = Utc::now() - self.max_age;
        match self.db.expire_stale_pending(cutoff).await {
            Ok(0) => {}
            Ok(swept) => {
                info!(swept, "Failed stale pending payments without a provider session");
            }
            Err(e) => {
                error!(error = %e, "Pending payment sweep failed");
            }
        }
    }
}
