//! Sweep job: the pull side of reconciliation. Polls providers for intents
//! that have not received a timely webhook and feeds the results through
//! the same transition logic. Single-flight: one run at a time, with the
//! in-progress flag released on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Duration as ChronoDuration;
use tokio::time::{Duration, sleep};
use tracing::{error, info};

use crate::domain::intent::IntentStatus;
use crate::error::AppError;
use crate::services::reconciliation::{ApplyOutcome, ReconciliationEngine};
use crate::store::IntentStore;

/// Statuses the sweep considers stuck when they outlive the age threshold.
const SWEPT_STATUSES: [IntentStatus; 4] = [
    IntentStatus::PendingProvider,
    IntentStatus::Processing,
    IntentStatus::WaitingForCryptoDeposit,
    IntentStatus::PartiallyPaid,
];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub applied: usize,
    pub skipped: bool,
}

impl SweepReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

pub struct Sweeper {
    engine: Arc<ReconciliationEngine>,
    stuck_after: ChronoDuration,
    interval: Duration,
    in_flight: AtomicBool,
}

/// Releases the single-flight flag however the tick exits.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Sweeper {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        stuck_after: ChronoDuration,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            stuck_after,
            interval,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Background loop. Per-tick failures are logged and absorbed; the loop
    /// never dies.
    pub async fn run(self: Arc<Self>) {
        info!(interval_secs = self.interval.as_secs(), "sweep job started");
        loop {
            match self.tick().await {
                Ok(report) if report.skipped => {
                    info!("sweep tick skipped: previous run still in flight");
                }
                Ok(report) => {
                    if report.scanned > 0 {
                        info!(
                            scanned = report.scanned,
                            applied = report.applied,
                            "sweep tick finished"
                        );
                    }
                }
                Err(e) => error!("sweep tick error: {}", e),
            }

            sleep(self.interval).await;
        }
    }

    /// One sweep pass. Poll failures fail open: the intent stays as it was
    /// and the next tick retries it.
    pub async fn tick(&self) -> Result<SweepReport, AppError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(SweepReport::skipped());
        }
        let _guard = InFlightGuard(&self.in_flight);

        let stuck = self
            .engine
            .intents()
            .list_stuck(&SWEPT_STATUSES, self.stuck_after)
            .await?;

        let mut report = SweepReport {
            scanned: stuck.len(),
            ..SweepReport::default()
        };

        for intent in &stuck {
            match self.engine.poll_and_reconcile(intent).await {
                Ok(ApplyOutcome::Applied(_)) => report.applied += 1,
                Ok(ApplyOutcome::Ignored(_)) => {}
                Err(e) => {
                    error!(
                        session_id = %intent.session_id,
                        "sweep poll failed, leaving state unchanged: {}",
                        e
                    );
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::intent::TransitionPolicy;
    use crate::gateways::GatewayRegistry;
    use crate::services::notifier::NoopNotifier;
    use crate::services::retry::RetryPolicy;
    use crate::store::memory::{MemoryIntentStore, MemoryLedgerStore};

    fn engine() -> Arc<ReconciliationEngine> {
        Arc::new(ReconciliationEngine::new(
            Arc::new(MemoryIntentStore::new()),
            Arc::new(MemoryLedgerStore::new()),
            GatewayRegistry::new(),
            Arc::new(NoopNotifier),
            TransitionPolicy::default(),
            RetryPolicy::default(),
        ))
    }

    #[tokio::test]
    async fn test_tick_with_nothing_stuck() {
        let sweeper = Sweeper::new(
            engine(),
            ChronoDuration::seconds(300),
            Duration::from_secs(60),
        );
        let report = sweeper.tick().await.unwrap();
        assert_eq!(report.scanned, 0);
        assert!(!report.skipped);
    }

    #[tokio::test]
    async fn test_second_concurrent_tick_is_skipped() {
        let sweeper = Sweeper::new(
            engine(),
            ChronoDuration::seconds(300),
            Duration::from_secs(60),
        );

        // simulate a run already holding the flag
        sweeper
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .unwrap();
        let report = sweeper.tick().await.unwrap();
        assert!(report.skipped);

        // release and verify the next tick runs
        sweeper.in_flight.store(false, Ordering::SeqCst);
        let report = sweeper.tick().await.unwrap();
        assert!(!report.skipped);
    }

    #[tokio::test]
    async fn test_flag_released_after_tick() {
        let sweeper = Sweeper::new(
            engine(),
            ChronoDuration::seconds(300),
            Duration::from_secs(60),
        );
        sweeper.tick().await.unwrap();
        assert!(!sweeper.in_flight.load(Ordering::SeqCst));
    }
}
