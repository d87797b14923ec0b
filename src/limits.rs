use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// Widest horizon a single resolution may cover.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;
/// A bookable window never spans more than a day.
pub const MAX_WINDOW_DURATION_MS: Ms = DAY_MS;

pub const MAX_MESSAGE_LEN: usize = 2_000;
pub const MAX_SLOTS_PER_USER: usize = 7 * 48;
/// Live (pending or accepted) requests one receiver may hold at once.
pub const MAX_ACTIVE_REQUESTS_PER_RECEIVER: usize = 10_000;
pub const MAX_BUSY_INTERVALS: usize = 10_000;
