//! Time-based staleness tracking for the index.
//!
//! Staleness is evaluated lazily whenever someone asks; there is no
//! background timer. Only a successful rebuild moves the refresh timestamp.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    NoIndex,
    Fresh,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshState {
    pub last_refresh: Option<DateTime<Utc>>,
    pub refresh_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RefreshScheduler {
    state: RefreshState,
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_INTERVAL_SECS)
    }
}

impl RefreshScheduler {
    pub fn new(refresh_interval_seconds: u64) -> Self {
        Self {
            state: RefreshState {
                last_refresh: None,
                refresh_interval_seconds,
            },
        }
    }

    pub fn refresh_state(&self) -> &RefreshState {
        &self.state
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.state.last_refresh
    }

    pub fn interval(&self) -> Duration {
        i64::try_from(self.state.refresh_interval_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> IndexState {
        match self.state.last_refresh {
            None => IndexState::NoIndex,
            Some(last) if now.signed_duration_since(last) >= self.interval() => IndexState::Stale,
            Some(_) => IndexState::Fresh,
        }
    }

    pub fn state(&self) -> IndexState {
        self.state_at(Utc::now())
    }

    pub fn needs_rebuild_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) != IndexState::Fresh
    }

    /// Records a completed rebuild. Call only once the new index is installed.
    pub fn mark_refreshed(&mut self, at: DateTime<Utc>) {
        self.state.last_refresh = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_no_index() {
        let scheduler = RefreshScheduler::default();
        assert_eq!(scheduler.state(), IndexState::NoIndex);
        assert!(scheduler.needs_rebuild_at(Utc::now()));
        assert_eq!(scheduler.last_refresh(), None);
    }

    #[test]
    fn test_fresh_then_stale() {
        let mut scheduler = RefreshScheduler::new(3600);
        let built = Utc::now();
        scheduler.mark_refreshed(built);

        assert_eq!(scheduler.state_at(built), IndexState::Fresh);
        assert_eq!(
            scheduler.state_at(built + Duration::seconds(3599)),
            IndexState::Fresh
        );
        // the threshold itself counts as stale
        assert_eq!(
            scheduler.state_at(built + Duration::seconds(3600)),
            IndexState::Stale
        );
        assert!(scheduler.needs_rebuild_at(built + Duration::hours(2)));
    }

    #[test]
    fn test_rebuild_returns_to_fresh() {
        let mut scheduler = RefreshScheduler::new(1);
        let first = Utc::now() - Duration::seconds(10);
        scheduler.mark_refreshed(first);
        assert_eq!(scheduler.state(), IndexState::Stale);

        scheduler.mark_refreshed(Utc::now());
        assert_eq!(scheduler.state(), IndexState::Fresh);
        assert!(scheduler.last_refresh().unwrap() > first);
    }

    #[test]
    fn test_huge_interval_does_not_overflow() {
        let mut scheduler = RefreshScheduler::new(u64::MAX);
        scheduler.mark_refreshed(Utc::now());
        assert_eq!(scheduler.state(), IndexState::Fresh);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&IndexState::NoIndex).unwrap(),
            "\"no_index\""
        );
    }
}
