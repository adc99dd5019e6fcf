//! Auto-release scheduler
//!
//! Runs in the background and periodically sweeps for confirmed records whose
//! auto-release window has elapsed, driving each through the state machine
//! with no human input. Selection and commit are decoupled on purpose: the
//! commit re-validates eligibility under the store's conditional update, so a
//! record moved by another actor between the two is skipped, never
//! double-processed. One record's failure is logged and the sweep moves on;
//! the record is retried on the next cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::error::EscrowError;
use crate::service::EscrowService;

/// Injected time source; production uses `SystemClock`, tests pin the sweep
/// instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Configuration for the auto-release scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoReleaseSchedulerConfig {
    /// Seconds between sweeps
    pub sweep_interval_secs: u64,
}

impl Default for AutoReleaseSchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300, // 5 minutes
        }
    }
}

impl AutoReleaseSchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Outcome counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Candidates selected this cycle
    pub scanned: usize,
    /// Records driven to RELEASED
    pub released: usize,
    /// Records another actor moved first
    pub skipped: usize,
    /// Failures left for the next cycle
    pub failed: usize,
}

/// Periodic process driving eligible records to RELEASED
pub struct AutoReleaseScheduler {
    config: AutoReleaseSchedulerConfig,
    service: Arc<EscrowService>,
    clock: Arc<dyn Clock>,
}

impl AutoReleaseScheduler {
    /// Create a new scheduler
    pub fn new(
        config: AutoReleaseSchedulerConfig,
        service: Arc<EscrowService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            service,
            clock,
        }
    }

    /// Sweep forever on the configured interval. Spawn this on the runtime;
    /// it only stops when the process shuts down.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.sweep_interval());
        info!(
            interval_secs = self.config.sweep_interval_secs,
            "Starting auto-release sweep loop"
        );

        loop {
            ticker.tick().await;
            let stats = self.sweep().await;
            if stats.scanned > 0 {
                info!(
                    scanned = stats.scanned,
                    released = stats.released,
                    skipped = stats.skipped,
                    failed = stats.failed,
                    "Auto-release sweep finished"
                );
            }
        }
    }

    /// One sweep cycle. Safe to run concurrently with itself and with manual
    /// actions on the same records.
    pub async fn sweep(&self) -> SweepStats {
        let now = self.clock.now();
        let mut stats = SweepStats::default();

        let candidates = match self.service.auto_release_candidates(now).await {
            Ok(candidates) => candidates,
            Err(err) => {
                error!(error = %err, "Sweep selection failed, retrying next cycle");
                return stats;
            }
        };
        stats.scanned = candidates.len();

        for record in candidates {
            match self.service.auto_release(record.id, now).await {
                Ok(_) => {
                    stats.released += 1;
                    info!(escrow_id = %record.id, "Auto-released escrow");
                }
                Err(err)
                    if matches!(
                        err,
                        EscrowError::InvalidTransition { .. }
                            | EscrowError::AutoReleaseNotEligible { .. }
                            | EscrowError::Conflict { .. }
                    ) =>
                {
                    // another actor won the record between selection and commit
                    stats.skipped += 1;
                    debug!(escrow_id = %record.id, error = %err, "Record already moved, skipped");
                }
                Err(err) => {
                    stats.failed += 1;
                    warn!(
                        escrow_id = %record.id,
                        error = %err,
                        "Auto-release failed, will retry next sweep"
                    );
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Currency, DeliveryInfo, EscrowStatus, PaymentDetails, PaymentMethod};
    use crate::notifier::NoopNotifier;
    use crate::service::{CreateEscrowRequest, EscrowServiceConfig};
    use crate::store::MemoryEscrowStore;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn service() -> Arc<EscrowService> {
        Arc::new(EscrowService::new(
            EscrowServiceConfig::default(),
            Arc::new(MemoryEscrowStore::new()),
            Arc::new(NoopNotifier),
        ))
    }

    async fn confirmed_escrow(service: &EscrowService, confirmed_at: DateTime<Utc>) -> Uuid {
        let record = service
            .create(
                CreateEscrowRequest {
                    transaction_id: Uuid::new_v4(),
                    payer_id: "buyer-1".to_string(),
                    payee_id: "seller-1".to_string(),
                    amount: Decimal::from(100),
                    fee: Decimal::from(5),
                    currency: Currency::Brl,
                    payment_details: PaymentDetails::new(PaymentMethod::Pix),
                    auto_release_days: None,
                    dispute_period_days: None,
                    notifications: None,
                    metadata: None,
                },
                t0(),
            )
            .await
            .unwrap();
        service.fund(record.id, None, t0()).await.unwrap();
        service
            .deliver(record.id, DeliveryInfo::default(), None, t0())
            .await
            .unwrap();
        service.confirm(record.id, None, confirmed_at).await.unwrap();
        record.id
    }

    #[tokio::test]
    async fn sweep_releases_only_eligible_records() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let service = service();
        let eligible = confirmed_escrow(&service, t0()).await;
        let too_recent = confirmed_escrow(&service, t0() + ChronoDuration::days(5)).await;

        let sweep_at = t0() + ChronoDuration::days(7);
        let scheduler = AutoReleaseScheduler::new(
            AutoReleaseSchedulerConfig::default(),
            Arc::clone(&service),
            Arc::new(FixedClock(sweep_at)),
        );

        let stats = scheduler.sweep().await;
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.failed, 0);

        let released = service.get(eligible).await.unwrap();
        assert_eq!(released.status, EscrowStatus::Released);
        let untouched = service.get(too_recent).await.unwrap();
        assert_eq!(untouched.status, EscrowStatus::Confirmed);
    }

    #[tokio::test]
    async fn overlapping_sweeps_release_exactly_once() {
        let service = service();
        let id = confirmed_escrow(&service, t0()).await;

        let sweep_at = t0() + ChronoDuration::days(7);
        let scheduler = Arc::new(AutoReleaseScheduler::new(
            AutoReleaseSchedulerConfig::default(),
            Arc::clone(&service),
            Arc::new(FixedClock(sweep_at)),
        ));

        let (first, second) = tokio::join!(scheduler.sweep(), scheduler.sweep());

        assert_eq!(first.released + second.released, 1);
        assert_eq!(first.failed + second.failed, 0);

        let record = service.get(id).await.unwrap();
        assert_eq!(record.status, EscrowStatus::Released);
        let released_entries = record
            .status_history
            .iter()
            .filter(|change| change.status == EscrowStatus::Released)
            .count();
        assert_eq!(released_entries, 1);
    }

    #[tokio::test]
    async fn manual_action_between_selection_and_commit_is_skipped() {
        let service = service();
        let id = confirmed_escrow(&service, t0()).await;
        let sweep_at = t0() + ChronoDuration::days(7);

        // a manual release lands first; the sweep must not double-apply
        service.release(id, Some("seller-1"), sweep_at).await.unwrap();

        let scheduler = AutoReleaseScheduler::new(
            AutoReleaseSchedulerConfig::default(),
            Arc::clone(&service),
            Arc::new(FixedClock(sweep_at)),
        );
        let stats = scheduler.sweep().await;
        assert_eq!(stats.scanned, 0);
        assert_eq!(stats.released, 0);

        let record = service.get(id).await.unwrap();
        assert_eq!(
            record
                .status_history
                .iter()
                .filter(|change| change.status == EscrowStatus::Released)
                .count(),
            1
        );
    }
}
