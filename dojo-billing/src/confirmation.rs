//! Payment confirmation watching.
//!
//! The authoritative pending to terminal transition arrives over the webhook
//! path. A client returning from checkout does not know the outcome yet, so
//! it watches the payment record: poll at a fixed interval, treat a missing
//! record as "not visible yet" rather than an error (the webhook can race
//! ahead of the redirect, or the redirect ahead of record creation), stop on
//! the first terminal status, and give up after a bounded attempt budget
//! instead of spinning forever.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::PaymentStatus;

/// One observation of the payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The record cannot be seen yet. Keep polling.
    NotYetVisible,
    /// The probe itself failed (transport error). Keep polling.
    Unavailable,
    Status(PaymentStatus),
}

/// Where the watcher reads payment status from.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self, payment_id: Uuid) -> ProbeResult;
}

/// Polling policy. The interval is fixed, not exponential; the bound comes
/// from `max_attempts`.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 40,
        }
    }
}

/// How a watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The record reached a terminal status.
    Settled(PaymentStatus),
    /// The attempt budget ran out with the record still pending or not
    /// visible. The caller surfaces "still processing, contact support".
    TimedOut,
    Cancelled,
}

/// Watch a payment until it settles, the budget runs out, or the token is
/// cancelled. Returns at the first terminal observation, so a caller can
/// never see a settled payment flicker back to pending.
pub async fn watch_payment(
    probe: &dyn StatusProbe,
    payment_id: Uuid,
    config: PollConfig,
    cancel: &CancellationToken,
) -> WatchOutcome {
    for attempt in 1..=config.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(payment_id = %payment_id, "Payment watch cancelled");
                return WatchOutcome::Cancelled;
            }
            result = probe.probe(payment_id) => {
                match result {
                    ProbeResult::Status(status) if status.is_terminal() => {
                        tracing::info!(
                            payment_id = %payment_id,
                            status = status.as_str(),
                            attempt,
                            "Payment settled"
                        );
                        return WatchOutcome::Settled(status);
                    }
                    ProbeResult::Status(_) => {
                        tracing::debug!(payment_id = %payment_id, attempt, "Payment still pending");
                    }
                    ProbeResult::NotYetVisible => {
                        tracing::debug!(payment_id = %payment_id, attempt, "Payment record not visible yet");
                    }
                    ProbeResult::Unavailable => {
                        tracing::warn!(payment_id = %payment_id, attempt, "Status probe unavailable");
                    }
                }
            }
        }

        if attempt < config.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(payment_id = %payment_id, "Payment watch cancelled");
                    return WatchOutcome::Cancelled;
                }
                _ = tokio::time::sleep(config.interval) => {}
            }
        }
    }

    tracing::warn!(payment_id = %payment_id, "Payment watch exhausted its attempt budget");
    WatchOutcome::TimedOut
}

/// Probe over the engine's own `GET /payments/:id` polling endpoint.
pub struct HttpStatusProbe {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusProbe {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn probe(&self, payment_id: Uuid) -> ProbeResult {
        let url = format!("{}/payments/{}", self.base_url, payment_id);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Status probe request failed");
                return ProbeResult::Unavailable;
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return ProbeResult::NotYetVisible;
        }
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Status probe got an error response");
            return ProbeResult::Unavailable;
        }

        #[derive(serde::Deserialize)]
        struct StatusBody {
            status: String,
        }
        match response.json::<StatusBody>().await {
            Ok(body) => ProbeResult::Status(PaymentStatus::from_string(&body.status)),
            Err(e) => {
                tracing::warn!(error = %e, "Status probe body was unreadable");
                ProbeResult::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedProbe {
        steps: Mutex<VecDeque<ProbeResult>>,
        probes: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(steps: Vec<ProbeResult>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                probes: AtomicU32::new(0),
            }
        }

        fn probe_count(&self) -> u32 {
            self.probes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusProbe for ScriptedProbe {
        async fn probe(&self, _payment_id: Uuid) -> ProbeResult {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ProbeResult::Status(PaymentStatus::Pending))
        }
    }

    fn fast_config(max_attempts: u32) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(3),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_settles_on_first_probe() {
        let probe = ScriptedProbe::new(vec![ProbeResult::Status(PaymentStatus::Succeeded)]);
        let cancel = CancellationToken::new();
        let outcome =
            watch_payment(&probe, Uuid::new_v4(), fast_config(10), &cancel).await;
        assert_eq!(outcome, WatchOutcome::Settled(PaymentStatus::Succeeded));
        assert_eq!(probe.probe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_times_out() {
        let probe = ScriptedProbe::new(vec![ProbeResult::NotYetVisible; 5]);
        let cancel = CancellationToken::new();
        let outcome = watch_payment(&probe, Uuid::new_v4(), fast_config(5), &cancel).await;
        assert_eq!(outcome, WatchOutcome::TimedOut);
        assert_eq!(probe.probe_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_probe_keeps_polling() {
        let probe = ScriptedProbe::new(vec![
            ProbeResult::Unavailable,
            ProbeResult::Status(PaymentStatus::Failed),
        ]);
        let cancel = CancellationToken::new();
        let outcome = watch_payment(&probe, Uuid::new_v4(), fast_config(10), &cancel).await;
        assert_eq!(outcome, WatchOutcome::Settled(PaymentStatus::Failed));
        assert_eq!(probe.probe_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_watch() {
        let probe = ScriptedProbe::new(vec![]);
        let cancel = CancellationToken::new();
        let payment_id = Uuid::new_v4();

        let token = cancel.clone();
        let watch = tokio::spawn(async move {
            let probe = probe;
            watch_payment(&probe, payment_id, fast_config(100), &token).await
        });

        // Let the watcher take its first probe and park in the sleep.
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        assert_eq!(watch.await.unwrap(), WatchOutcome::Cancelled);
    }
}
