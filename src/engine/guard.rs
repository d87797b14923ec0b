//! Booking conflict guard.
//!
//! A receiver's reservations live in their [`ReceiverLedger`], which is only
//! mutated under that ledger's write lock. `try_reserve` runs under the same
//! lock as the insert that follows it, so check-then-claim is indivisible with
//! respect to every other reservation attempt for that receiver.

use tracing::debug;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Proof that `span` was free on the ledger at the time of the check.
/// Only meaningful while the ledger write lock that produced it is held.
#[must_use]
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reserved {
    pub span: Span,
}

pub(crate) fn validate_window(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidInput("window start must be before end".into()));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_WINDOW_DURATION_MS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(())
}

/// Claim `span` on the receiver's ledger, or report the active request
/// already holding it (or any overlapping part of it).
pub(crate) fn try_reserve(ledger: &ReceiverLedger, span: &Span) -> Result<Reserved, EngineError> {
    if let Some(existing) = ledger.overlapping(span).next() {
        let status = ledger
            .requests
            .get(&existing.request_id)
            .map_or(SwapStatus::Pending, |r| r.status);
        debug!(
            receiver_id = %ledger.receiver_id,
            existing = %existing.request_id,
            %status,
            "slot already booked"
        );
        metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::SlotAlreadyBooked {
            existing: existing.request_id,
            status,
        });
    }
    Ok(Reserved { span: *span })
}

/// Only live requests count; terminal history never blocks new bookings.
pub(crate) fn check_capacity(ledger: &ReceiverLedger) -> Result<(), EngineError> {
    if ledger.reservations.len() >= MAX_ACTIVE_REQUESTS_PER_RECEIVER {
        return Err(EngineError::LimitExceeded("too many active requests for receiver"));
    }
    Ok(())
}

/// Free the window held by `request_id`. Returns false if it held none.
pub(crate) fn release(ledger: &mut ReceiverLedger, request_id: RequestId) -> bool {
    ledger.remove_reservation(request_id).is_some()
}
