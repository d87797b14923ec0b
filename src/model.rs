use std::collections::HashMap;
use std::fmt;

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). The only time type.
pub type Ms = i64;

pub type UserId = Ulid;
pub type RequestId = Ulid;

pub const MINUTES_PER_DAY: u16 = 1440;
pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// One weekly recurring availability window, in the owner's local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringSlot {
    pub day: Weekday,
    pub start_minute: u16,
    pub end_minute: u16,
}

impl RecurringSlot {
    pub fn new(day: Weekday, start_minute: u16, end_minute: u16) -> Result<Self, SlotError> {
        if start_minute >= end_minute || end_minute > MINUTES_PER_DAY {
            return Err(SlotError::Bounds {
                start_minute,
                end_minute,
            });
        }
        Ok(Self {
            day,
            start_minute,
            end_minute,
        })
    }

    pub fn overlaps(&self, other: &RecurringSlot) -> bool {
        self.day == other.day
            && self.start_minute < other.end_minute
            && other.start_minute < self.end_minute
    }

    /// Deterministic ordering key: weekday (Monday first), then minutes.
    pub fn origin_key(&self) -> (u32, u16, u16) {
        (self.day.num_days_from_monday(), self.start_minute, self.end_minute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("slot minutes out of range: [{start_minute}, {end_minute})")]
    Bounds { start_minute: u16, end_minute: u16 },
    #[error("unknown weekday: {0}")]
    Weekday(String),
    #[error("malformed time of day: {0}")]
    TimeOfDay(String),
    #[error("overlapping slots on {day}: {first} and {second}")]
    Overlap {
        day: Weekday,
        first: String,
        second: String,
    },
}

impl fmt::Display for RecurringSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}-{:02}:{:02}",
            self.day,
            self.start_minute / 60,
            self.start_minute % 60,
            self.end_minute / 60,
            self.end_minute % 60
        )
    }
}

/// A busy block reported by the calendar provider. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: Ms,
    pub end: Ms,
}

impl BusyInterval {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    /// `None` for degenerate intervals (`start >= end`).
    pub fn span(&self) -> Option<Span> {
        (self.start < self.end).then(|| Span::new(self.start, self.end))
    }
}

/// A bookable window on a specific date, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcreteWindow {
    pub owner_id: UserId,
    pub span: Span,
}

impl ConcreteWindow {
    pub fn new(owner_id: UserId, start: Ms, end: Ms) -> Self {
        Self {
            owner_id,
            span: Span::new(start, end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Completed,
}

impl SwapStatus {
    /// Active requests hold a reservation on their window.
    pub fn is_active(self) -> bool {
        matches!(self, SwapStatus::Pending | SwapStatus::Accepted)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(self, next: SwapStatus) -> bool {
        use SwapStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Accepted, Cancelled)
                | (Accepted, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwapStatus::Pending => "PENDING",
            SwapStatus::Accepted => "ACCEPTED",
            SwapStatus::Rejected => "REJECTED",
            SwapStatus::Cancelled => "CANCELLED",
            SwapStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub id: RequestId,
    pub requester_id: UserId,
    pub receiver_id: UserId,
    pub window: ConcreteWindow,
    pub message: Option<String>,
    pub status: SwapStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl SwapRequest {
    pub fn is_party(&self, user_id: UserId) -> bool {
        self.requester_id == user_id || self.receiver_id == user_id
    }
}

/// A claim on `span` by an active request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub request_id: RequestId,
    pub span: Span,
}

/// Everything owned by one receiver: every request addressed to them and the
/// reservations of the active ones. Guarded as a unit.
#[derive(Debug, Clone)]
pub struct ReceiverLedger {
    pub receiver_id: UserId,
    /// Active reservations, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    pub requests: HashMap<RequestId, SwapRequest>,
}

impl ReceiverLedger {
    pub fn new(receiver_id: UserId) -> Self {
        Self {
            receiver_id,
            reservations: Vec::new(),
            requests: HashMap::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, request_id: RequestId) -> Option<Reservation> {
        let pos = self
            .reservations
            .iter()
            .position(|r| r.request_id == request_id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations whose span overlaps the query window.
    /// Binary search skips reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// WAL record format: flat, one variant per persisted fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RequestCreated {
        id: RequestId,
        requester_id: UserId,
        receiver_id: UserId,
        span: Span,
        message: Option<String>,
        at: Ms,
    },
    RequestTransitioned {
        id: RequestId,
        requester_id: UserId,
        receiver_id: UserId,
        status: SwapStatus,
        at: Ms,
    },
}

impl Event {
    pub fn request_id(&self) -> RequestId {
        match self {
            Event::RequestCreated { id, .. } | Event::RequestTransitioned { id, .. } => *id,
        }
    }

    pub fn receiver_id(&self) -> UserId {
        match self {
            Event::RequestCreated { receiver_id, .. }
            | Event::RequestTransitioned { receiver_id, .. } => *receiver_id,
        }
    }

    pub fn requester_id(&self) -> UserId {
        match self {
            Event::RequestCreated { requester_id, .. }
            | Event::RequestTransitioned { requester_id, .. } => *requester_id,
        }
    }
}
