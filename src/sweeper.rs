use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::{Engine, now_ms};
use crate::retry::{RetryPolicy, with_storage_retry};

/// Background task that completes ACCEPTED requests whose window has ended.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let completed = engine.sweep_completions(now_ms()).await;
        if completed > 0 {
            metrics::counter!(crate::observability::SWEEP_COMPLETED_TOTAL)
                .increment(completed as u64);
        }
    }
}

/// Background task that compacts the WAL once `threshold` appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, retry: RetryPolicy) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold, retry).await;
    }
}

/// Returns true if a compaction ran and succeeded.
pub async fn compact_if_needed(engine: &Engine, threshold: u64, retry: RetryPolicy) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not needed");
        return false;
    }
    match with_storage_retry(retry, "compact_wal", || engine.compact_wal()).await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!(appends, "compacted WAL");
            true
        }
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::wal::Wal;
    use std::path::PathBuf;
    use ulid::Ulid;

    const HOUR: Ms = 3_600_000;
    const BASE: Ms = 1_717_200_000_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("swapslot_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn accepted_request(engine: &Arc<Engine>, start: Ms, end: Ms) -> SwapRequest {
        let receiver = Ulid::new();
        let request = engine
            .create_swap_request(
                Ulid::new(),
                receiver,
                ConcreteWindow::new(receiver, start, end),
                None,
            )
            .await
            .unwrap();
        engine.accept_swap_request(request.id, receiver).await.unwrap()
    }

    #[tokio::test]
    async fn sweeper_completes_elapsed_sessions() {
        let path = test_wal_path("sweep_elapsed.wal");
        let engine = Arc::new(Engine::new(path, Arc::new(NotifyHub::new())).unwrap());

        let now = now_ms();
        let past = accepted_request(&engine, now - 2 * HOUR, now - HOUR).await;
        let future = accepted_request(&engine, now + HOUR, now + 2 * HOUR).await;

        let handle = tokio::spawn(run_sweeper(engine.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let past = engine.get_swap_request(past.id).await.unwrap();
        let future = engine.get_swap_request(future.id).await.unwrap();
        assert_eq!(past.status, SwapStatus::Completed);
        assert_eq!(future.status, SwapStatus::Accepted);
    }

    #[tokio::test]
    async fn compaction_waits_for_threshold() {
        let path = test_wal_path("compact_threshold.wal");
        let engine = Arc::new(Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap());

        let request = accepted_request(&engine, BASE, BASE + HOUR).await;
        // create + accept
        assert!(!compact_if_needed(&engine, 3, RetryPolicy::default()).await);
        engine.cancel_swap_request(request.id, request.requester_id).await.unwrap();
        assert!(compact_if_needed(&engine, 3, RetryPolicy::default()).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // One create plus the final transition survive.
        let events = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            Event::RequestTransitioned { status: SwapStatus::Cancelled, .. }
        ));
    }
}
