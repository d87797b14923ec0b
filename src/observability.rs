use std::net::SocketAddr;

// ── Swap request lifecycle ──────────────────────────────────────

/// Counter: swap requests created.
pub const REQUESTS_CREATED_TOTAL: &str = "swapslot_requests_created_total";

/// Counter: reservation attempts rejected because the window was held.
pub const SLOT_CONFLICTS_TOTAL: &str = "swapslot_slot_conflicts_total";

/// Counter: status transitions applied. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "swapslot_transitions_total";

/// Counter: requests moved to COMPLETED by the sweeper.
pub const SWEEP_COMPLETED_TOTAL: &str = "swapslot_sweep_completed_total";

// ── Availability resolution ─────────────────────────────────────

/// Histogram: resolve latency in seconds, calendar fetch included.
pub const RESOLVE_DURATION_SECONDS: &str = "swapslot_resolve_duration_seconds";

/// Counter: failed busy-interval fetches. Labels: reason (error, timeout).
pub const CALENDAR_FAILURES_TOTAL: &str = "swapslot_calendar_failures_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "swapslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "swapslot_wal_flush_batch_size";

/// Counter: storage operations retried after a transient failure.
pub const STORAGE_RETRIES_TOTAL: &str = "swapslot_storage_retries_total";

/// Counter: WAL compactions run.
pub const WAL_COMPACTIONS_TOTAL: &str = "swapslot_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
