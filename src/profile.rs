use async_trait::async_trait;
use chrono::Weekday;
use chrono_tz::Tz;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use crate::engine::EngineError;
use crate::limits::MAX_SLOTS_PER_USER;
use crate::model::*;

/// A user's declared weekly availability and the timezone it is expressed in.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAvailability {
    pub timezone: Tz,
    pub slots: Vec<RecurringSlot>,
}

/// Read access to recurring availability, owned by the profile service.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `None` when the user has never saved availability.
    async fn recurring_availability(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserAvailability>, EngineError>;
}

// ── Availability form payload ─────────────────────────────────────

/// One day of the availability form: `{ "day": "MONDAY", "enabled": true,
/// "slots": [{ "start": "09:00", "end": "10:00" }] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct DayAvailability {
    pub day: String,
    pub enabled: bool,
    #[serde(default)]
    pub slots: Vec<TimeRange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

pub fn parse_weekday(s: &str) -> Result<Weekday, SlotError> {
    match s.trim().to_ascii_uppercase().as_str() {
        "MONDAY" | "MON" => Ok(Weekday::Mon),
        "TUESDAY" | "TUE" => Ok(Weekday::Tue),
        "WEDNESDAY" | "WED" => Ok(Weekday::Wed),
        "THURSDAY" | "THU" => Ok(Weekday::Thu),
        "FRIDAY" | "FRI" => Ok(Weekday::Fri),
        "SATURDAY" | "SAT" => Ok(Weekday::Sat),
        "SUNDAY" | "SUN" => Ok(Weekday::Sun),
        _ => Err(SlotError::Weekday(s.to_string())),
    }
}

/// `"HH:MM"` to minute of day. `"24:00"` is accepted as end of day.
pub fn parse_time_of_day(s: &str) -> Result<u16, SlotError> {
    let bad = || SlotError::TimeOfDay(s.to_string());
    let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
    let h: u16 = h.parse().map_err(|_| bad())?;
    let m: u16 = m.parse().map_err(|_| bad())?;
    if m >= 60 || h > 24 || (h == 24 && m != 0) {
        return Err(bad());
    }
    Ok(h * 60 + m)
}

/// Flatten enabled days into validated slots. Disabled days contribute nothing.
pub fn slots_from_days(days: &[DayAvailability]) -> Result<Vec<RecurringSlot>, SlotError> {
    let mut slots = Vec::new();
    for day in days.iter().filter(|d| d.enabled) {
        let weekday = parse_weekday(&day.day)?;
        for range in &day.slots {
            slots.push(RecurringSlot::new(
                weekday,
                parse_time_of_day(&range.start)?,
                parse_time_of_day(&range.end)?,
            )?);
        }
    }
    Ok(slots)
}

/// Reject any pair of slots that overlap on the same weekday.
pub fn validate_slot_set(slots: &[RecurringSlot]) -> Result<(), SlotError> {
    let mut sorted = slots.to_vec();
    sorted.sort_by_key(RecurringSlot::origin_key);
    for pair in sorted.windows(2) {
        if pair[0].overlaps(&pair[1]) {
            return Err(SlotError::Overlap {
                day: pair[0].day,
                first: pair[0].to_string(),
                second: pair[1].to_string(),
            });
        }
    }
    Ok(())
}

// ── In-memory store ───────────────────────────────────────────────

pub struct InMemoryProfileStore {
    profiles: DashMap<UserId, UserAvailability>,
    default_timezone: Tz,
}

impl InMemoryProfileStore {
    pub fn new(default_timezone: Tz) -> Self {
        Self {
            profiles: DashMap::new(),
            default_timezone,
        }
    }

    /// Replace the user's whole slot set. A missing timezone keeps the one
    /// already stored, or the store default for new users.
    pub fn replace_availability(
        &self,
        user_id: UserId,
        timezone: Option<Tz>,
        slots: Vec<RecurringSlot>,
    ) -> Result<usize, EngineError> {
        if slots.len() > MAX_SLOTS_PER_USER {
            return Err(EngineError::LimitExceeded("too many availability slots"));
        }
        validate_slot_set(&slots)?;

        let count = slots.len();
        let mut entry = self
            .profiles
            .entry(user_id)
            .or_insert_with(|| UserAvailability {
                timezone: self.default_timezone,
                slots: Vec::new(),
            });
        if let Some(tz) = timezone {
            entry.timezone = tz;
        }
        entry.slots = slots;
        debug!(%user_id, count, "availability replaced");
        Ok(count)
    }

    /// Replace availability from the day-by-day form payload.
    pub fn replace_from_days(
        &self,
        user_id: UserId,
        timezone: Option<Tz>,
        days: &[DayAvailability],
    ) -> Result<usize, EngineError> {
        let slots = slots_from_days(days)?;
        self.replace_availability(user_id, timezone, slots)
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn recurring_availability(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserAvailability>, EngineError> {
        Ok(self.profiles.get(&user_id).map(|e| e.value().clone()))
    }
}
