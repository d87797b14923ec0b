mod availability;

pub use availability::{
    local_to_utc_ms, merge_overlapping, merge_weekly_slots, normalize_busy, project_slots,
    reconcile, subtract_intervals, Projected,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::calendar::CalendarAdapter;
use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;
use crate::profile::ProfileStore;

const DAY_MS: Ms = 86_400_000;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Default horizon length when the caller does not pick one.
    pub horizon_days: u32,
    /// Residual windows shorter than this are not bookable.
    pub min_bookable_ms: Ms,
    /// Upper bound on a single busy-interval fetch.
    pub calendar_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            horizon_days: 30,
            min_bookable_ms: 15 * MINUTE_MS,
            calendar_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of a resolution that may have skipped busy-time subtraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub windows: Vec<ConcreteWindow>,
    /// True when the calendar could not be consulted: windows may be busy.
    pub provisional: bool,
}

/// Turns weekly availability plus calendar busy time into bookable windows.
/// Performs no writes, so dropping a resolve future is always safe.
pub struct Resolver {
    profiles: Arc<dyn ProfileStore>,
    calendar: Arc<dyn CalendarAdapter>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        calendar: Arc<dyn CalendarAdapter>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            profiles,
            calendar,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Bookable windows for `user_id` in `[horizon_start, horizon_end)`.
    ///
    /// Fails with `CalendarUnavailable` if busy time cannot be fetched; it is
    /// never assumed to be empty.
    pub async fn resolve(
        &self,
        user_id: UserId,
        horizon_start: Ms,
        horizon_end: Ms,
    ) -> Result<Vec<ConcreteWindow>, EngineError> {
        let resolution = self
            .resolve_inner(user_id, horizon_start, horizon_end, false)
            .await?;
        Ok(resolution.windows)
    }

    /// Like [`Resolver::resolve`], but degrades to the raw projection when the
    /// calendar is unavailable and flags the result as provisional.
    pub async fn resolve_or_provisional(
        &self,
        user_id: UserId,
        horizon_start: Ms,
        horizon_end: Ms,
    ) -> Result<Resolution, EngineError> {
        self.resolve_inner(user_id, horizon_start, horizon_end, true)
            .await
    }

    /// Resolve `[now, now + horizon_days)`.
    pub async fn resolve_default_horizon(
        &self,
        user_id: UserId,
        now: Ms,
    ) -> Result<Vec<ConcreteWindow>, EngineError> {
        let end = Ms::from(self.config.horizon_days)
            .checked_mul(DAY_MS)
            .and_then(|span| now.checked_add(span))
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        self.resolve(user_id, now, end).await
    }

    async fn resolve_inner(
        &self,
        user_id: UserId,
        horizon_start: Ms,
        horizon_end: Ms,
        allow_provisional: bool,
    ) -> Result<Resolution, EngineError> {
        if horizon_start >= horizon_end {
            return Err(EngineError::InvalidInput(
                "horizon start must be before end".into(),
            ));
        }
        if horizon_start < MIN_VALID_TIMESTAMP_MS || horizon_end > MAX_VALID_TIMESTAMP_MS {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        if horizon_end - horizon_start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("horizon too wide"));
        }
        let started = Instant::now();
        let query = Span::new(horizon_start, horizon_end);

        let Some(profile) = self.profiles.recurring_availability(user_id).await? else {
            return Ok(Resolution {
                windows: Vec::new(),
                provisional: false,
            });
        };

        let slots = merge_weekly_slots(&profile.slots);
        let candidates = project_slots(&slots, profile.timezone, &query);
        // Nothing to subtract from, so the calendar cannot change the answer.
        if candidates.is_empty() {
            return Ok(Resolution {
                windows: Vec::new(),
                provisional: false,
            });
        }

        let (busy, provisional) = match self.fetch_busy(user_id, query).await {
            Ok(busy) => (busy, false),
            Err(e) if allow_provisional => {
                warn!(%user_id, error = %e, "resolving without busy intervals");
                (Vec::new(), true)
            }
            Err(e) => return Err(e),
        };

        let windows: Vec<ConcreteWindow> =
            reconcile(&candidates, &busy, self.config.min_bookable_ms)
                .into_iter()
                .map(|p| ConcreteWindow {
                    owner_id: user_id,
                    span: p.span,
                })
                .collect();

        metrics::histogram!(crate::observability::RESOLVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        debug!(
            %user_id,
            candidates = candidates.len(),
            windows = windows.len(),
            provisional,
            "availability resolved"
        );
        Ok(Resolution {
            windows,
            provisional,
        })
    }

    async fn fetch_busy(&self, user_id: UserId, query: Span) -> Result<Vec<Span>, EngineError> {
        let fetch = self.calendar.fetch_busy_intervals(user_id, query);
        let busy = match tokio::time::timeout(self.config.calendar_timeout, fetch).await {
            Ok(Ok(busy)) => busy,
            Ok(Err(e)) => {
                metrics::counter!(crate::observability::CALENDAR_FAILURES_TOTAL, "reason" => "error")
                    .increment(1);
                return Err(EngineError::CalendarUnavailable(e.to_string()));
            }
            Err(_) => {
                metrics::counter!(crate::observability::CALENDAR_FAILURES_TOTAL, "reason" => "timeout")
                    .increment(1);
                return Err(EngineError::CalendarUnavailable(format!(
                    "no response within {:?}",
                    self.config.calendar_timeout
                )));
            }
        };
        if busy.len() > MAX_BUSY_INTERVALS {
            return Err(EngineError::LimitExceeded("too many busy intervals"));
        }
        let dropped = busy.iter().filter(|b| b.start >= b.end).count();
        if dropped > 0 {
            warn!(%user_id, dropped, "ignoring degenerate busy intervals");
        }
        Ok(normalize_busy(&busy))
    }
}
