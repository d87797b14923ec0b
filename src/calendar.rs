use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::model::{BusyInterval, Span, UserId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum CalendarError {
    #[error("no calendar linked for user {0}")]
    NotLinked(UserId),
    #[error("calendar provider error: {0}")]
    Provider(String),
}

/// Source of a user's busy time, typically a third-party calendar.
///
/// Implementations may be slow or fail outright; callers bound every fetch
/// with a timeout.
#[async_trait]
pub trait CalendarAdapter: Send + Sync {
    async fn fetch_busy_intervals(
        &self,
        user_id: UserId,
        range: Span,
    ) -> Result<Vec<BusyInterval>, CalendarError>;
}

/// In-memory calendar for offline use and tests.
#[derive(Default)]
pub struct StaticCalendar {
    busy: DashMap<UserId, Vec<BusyInterval>>,
    failing: DashSet<UserId>,
}

impl StaticCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_busy(&self, user_id: UserId, busy: Vec<BusyInterval>) {
        self.busy.insert(user_id, busy);
    }

    /// Make every fetch for `user_id` fail until cleared.
    pub fn set_failing(&self, user_id: UserId, failing: bool) {
        if failing {
            self.failing.insert(user_id);
        } else {
            self.failing.remove(&user_id);
        }
    }
}

#[async_trait]
impl CalendarAdapter for StaticCalendar {
    async fn fetch_busy_intervals(
        &self,
        user_id: UserId,
        range: Span,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        if self.failing.contains(&user_id) {
            return Err(CalendarError::Provider("provider unreachable".into()));
        }
        Ok(self
            .busy
            .get(&user_id)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|b| b.start < range.end && b.end > range.start)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}
