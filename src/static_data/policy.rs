use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::DownloadState;

/// Minimum-interval rule for static archive downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub min_interval: Duration,
}

impl RefreshPolicy {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Whether a download may start at `now`.
    ///
    /// A recorded download time later than `now` means the clock moved
    /// backwards; it is not trusted and a download is allowed.
    pub fn should_refresh(&self, state: &DownloadState, now: DateTime<Utc>) -> bool {
        match state.last_downloaded_at {
            None => true,
            Some(last) if last > now => true,
            Some(last) => now - last >= self.interval(),
        }
    }

    /// Earliest time the next download is allowed, or `None` if one is
    /// allowed at `now`.
    pub fn next_allowed_at(
        &self,
        state: &DownloadState,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if self.should_refresh(state, now) {
            return None;
        }
        state
            .last_downloaded_at
            .and_then(|last| last.checked_add_signed(self.interval()))
    }

    fn interval(&self) -> TimeDelta {
        TimeDelta::from_std(self.min_interval).unwrap_or(TimeDelta::MAX)
    }
}
