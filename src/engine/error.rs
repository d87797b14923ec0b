use crate::model::{RequestId, SlotError, SwapStatus, UserId};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(RequestId),

    /// The window (or an overlapping one) is held by another active request.
    #[error("slot already booked by request {existing} ({status})")]
    SlotAlreadyBooked {
        existing: RequestId,
        status: SwapStatus,
    },

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: RequestId,
        from: SwapStatus,
        to: SwapStatus,
    },

    #[error("user {actor} may not modify request {id}")]
    Unauthorized { id: RequestId, actor: UserId },

    /// Busy intervals could not be fetched; availability may be inaccurate.
    #[error("calendar unavailable: {0}")]
    CalendarUnavailable(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid slot: {0}")]
    InvalidSlot(#[from] SlotError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl EngineError {
    /// Only transient infrastructure failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StorageUnavailable(_))
    }
}
