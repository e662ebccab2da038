use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use cinema_core::models::Screening;
use cinema_store::keys;

use crate::error::{BookingError, BookingResult};
use crate::lock::LockError;
use crate::orchestrator::BookingService;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WarmupReport {
    pub warmed: usize,
    /// Screenings whose lock was busy.
    pub skipped: usize,
    pub failed: usize,
}

impl BookingService {
    /// Builds seat maps for screenings starting within `horizon` of `now`.
    pub async fn warm_upcoming(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
    ) -> BookingResult<WarmupReport> {
        let upcoming = self
            .screenings
            .repository()
            .list_starting_between(now, now + horizon)
            .await?;
        info!(count = upcoming.len(), "Warming seat maps");

        let mut report = WarmupReport::default();
        for screening in &upcoming {
            match self.warm_seat_map(screening).await {
                Ok(()) => report.warmed += 1,
                Err(BookingError::TryAgain) => {
                    debug!(screening_id = screening.id, "Screening busy, skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(screening_id = screening.id, error = ?e, "Seat map warm-up failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn warm_seat_map(&self, screening: &Screening) -> BookingResult<()> {
        let lock = match self
            .locks
            .acquire(&keys::screening_lock(screening.id), self.rules.lock_ttl())
            .await
        {
            Ok(lock) => lock,
            Err(LockError::AlreadyLocked(_)) => return Err(BookingError::TryAgain),
            Err(e) => return Err(e.into()),
        };

        let rebuilt = self.rebuild_seat_map(screening).await;
        if let Err(e) = lock.release().await {
            warn!(screening_id = screening.id, error = %e, "Failed to release lock");
        }
        rebuilt
    }
}
