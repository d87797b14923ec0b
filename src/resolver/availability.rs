use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::model::*;

// ── Projection ────────────────────────────────────────────────────

/// A candidate or residual window, remembering which weekly slot produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projected {
    pub span: Span,
    pub origin: RecurringSlot,
}

/// Union slots that overlap or touch on the same weekday.
/// Output is sorted by weekday (Monday first), then start minute.
pub fn merge_weekly_slots(slots: &[RecurringSlot]) -> Vec<RecurringSlot> {
    let mut sorted = slots.to_vec();
    sorted.sort_by_key(RecurringSlot::origin_key);

    let mut merged: Vec<RecurringSlot> = Vec::with_capacity(sorted.len());
    for slot in sorted {
        if let Some(last) = merged.last_mut()
            && last.day == slot.day
            && slot.start_minute <= last.end_minute
        {
            last.end_minute = last.end_minute.max(slot.end_minute);
            continue;
        }
        merged.push(slot);
    }
    merged
}

/// Project weekly slots onto every local date touched by `query`, normalize to
/// UTC and clip to the query. Slots must already be merged.
pub fn project_slots(slots: &[RecurringSlot], tz: Tz, query: &Span) -> Vec<Projected> {
    let mut out = Vec::new();
    if slots.is_empty() {
        return out;
    }
    let (Some(first), Some(last)) = (local_date(tz, query.start), local_date(tz, query.end)) else {
        return out;
    };

    let mut date = first;
    while date <= last {
        for slot in slots.iter().filter(|s| s.day == date.weekday()) {
            let (Some(start), Some(end)) = (
                local_to_utc_ms(tz, date, slot.start_minute),
                local_to_utc_ms(tz, date, slot.end_minute),
            ) else {
                continue;
            };
            let start = start.max(query.start);
            let end = end.min(query.end);
            if start < end {
                out.push(Projected {
                    span: Span::new(start, end),
                    origin: *slot,
                });
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    out
}

fn local_date(tz: Tz, ms: Ms) -> Option<NaiveDate> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.with_timezone(&tz).date_naive())
}

/// Resolve a local wall-clock minute on `date` to a UTC instant.
///
/// Ambiguous times (fall-back) take the earlier instant. Times inside a
/// spring-forward gap map to the first valid instant after the gap, so the
/// mapping stays monotone and slots disjoint in local time stay disjoint in
/// UTC. A slot lying wholly inside a gap projects to an empty span.
pub fn local_to_utc_ms(tz: Tz, date: NaiveDate, minute: u16) -> Option<Ms> {
    let (date, minute) = if minute >= MINUTES_PER_DAY {
        (date.succ_opt()?, 0)
    } else {
        (date, minute)
    };
    let mut naive = date.and_hms_opt(u32::from(minute / 60), u32::from(minute % 60), 0)?;
    // Real gaps are at most a day wide.
    for _ in 0..=MINUTES_PER_DAY {
        let local = tz.from_local_datetime(&naive);
        if let (Some(a), Some(b)) = (local.earliest(), local.latest()) {
            return Some(a.timestamp_millis().min(b.timestamp_millis()));
        }
        naive += Duration::minutes(1);
    }
    None
}

// ── Interval arithmetic ───────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Sort and merge raw busy intervals, dropping degenerate ones.
pub fn normalize_busy(busy: &[BusyInterval]) -> Vec<Span> {
    let mut spans: Vec<Span> = busy.iter().filter_map(BusyInterval::span).collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Subtract busy time from every candidate, drop residues shorter than
/// `min_duration_ms`, and order by start then slot origin.
pub fn reconcile(candidates: &[Projected], busy: &[Span], min_duration_ms: Ms) -> Vec<Projected> {
    let mut out = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        for span in subtract_intervals(&[candidate.span], busy) {
            if span.duration_ms() >= min_duration_ms {
                out.push(Projected {
                    span,
                    origin: candidate.origin,
                });
            }
        }
    }
    out.sort_by_key(|p| (p.span.start, p.origin.origin_key(), p.span.end));
    out
}
