mod error;
mod guard;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use error::EngineError;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use tracing::{error, info, warn};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedLedger = Arc<RwLock<ReceiverLedger>>;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, then
/// fsync once and answer every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Every caller in a failed batch is told its write failed and may retry, so
/// none of the batch may survive on disk.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        error!("WAL rollback failed, retrying before next append: {e}");
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            commit_batch(wal, &mut vec![(event, response)]);
        }
    }
}

/// The swap request store: one ledger per receiver, durable through the WAL.
pub struct Engine {
    pub(super) ledgers: DashMap<UserId, SharedLedger>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: request id → receiver id.
    pub(super) request_to_receiver: DashMap<RequestId, UserId>,
    /// Requester → requests they sent, in creation order.
    pub(super) sent: DashMap<UserId, Vec<RequestId>>,
    /// Mutations hold this shared, compaction holds it exclusively, so a
    /// compaction snapshot never misses an in-flight append.
    /// Lock order: gate, then ledger.
    pub(super) write_gate: RwLock<()>,
}

/// Apply a persisted event to its receiver's ledger (caller holds the lock).
fn apply_to_ledger(
    ledger: &mut ReceiverLedger,
    event: &Event,
    request_index: &DashMap<RequestId, UserId>,
    sent: &DashMap<UserId, Vec<RequestId>>,
) {
    match event {
        Event::RequestCreated {
            id,
            requester_id,
            receiver_id,
            span,
            message,
            at,
        } => {
            ledger.requests.insert(
                *id,
                SwapRequest {
                    id: *id,
                    requester_id: *requester_id,
                    receiver_id: *receiver_id,
                    window: ConcreteWindow {
                        owner_id: *receiver_id,
                        span: *span,
                    },
                    message: message.clone(),
                    status: SwapStatus::Pending,
                    created_at: *at,
                    updated_at: *at,
                },
            );
            ledger.insert_reservation(Reservation {
                request_id: *id,
                span: *span,
            });
            request_index.insert(*id, *receiver_id);
            sent.entry(*requester_id).or_default().push(*id);
        }
        Event::RequestTransitioned { id, status, at, .. } => {
            if let Some(request) = ledger.requests.get_mut(id) {
                request.status = *status;
                request.updated_at = *at;
            }
            if status.is_terminal() {
                guard::release(ledger, *id);
            }
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (events, wal) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            ledgers: DashMap::new(),
            wal_tx,
            notify,
            request_to_receiver: DashMap::new(),
            sent: DashMap::new(),
            write_gate: RwLock::new(()),
        };

        // We are the sole owner of every ledger here, so try_write never
        // contends. Blocking locks are off limits: this may run inside a runtime.
        let mut skipped = 0usize;
        for event in &events {
            let ledger = engine.ledger_for(event.receiver_id());
            let mut guard = ledger
                .try_write()
                .map_err(|_| io::Error::other("replay: ledger unexpectedly locked"))?;
            // The log must never rebuild two live reservations on one window.
            if let Event::RequestCreated { id, span, .. } = event
                && let Some(existing) = guard.overlapping(span).next()
            {
                warn!(
                    request_id = %id,
                    existing = %existing.request_id,
                    "replay: dropping create that overlaps an active reservation"
                );
                skipped += 1;
                continue;
            }
            apply_to_ledger(&mut guard, event, &engine.request_to_receiver, &engine.sent);
        }
        if !events.is_empty() {
            info!(
                "replayed {} events ({} requests, {} receivers, {} dropped)",
                events.len(),
                engine.request_to_receiver.len(),
                engine.ledgers.len(),
                skipped
            );
        }

        Ok(engine)
    }

    /// Get or create the ledger for a receiver. Concurrent callers for the
    /// same receiver always get the same ledger.
    pub(super) fn ledger_for(&self, receiver_id: UserId) -> SharedLedger {
        self.ledgers
            .entry(receiver_id)
            .or_insert_with(|| Arc::new(RwLock::new(ReceiverLedger::new(receiver_id))))
            .clone()
    }

    pub(super) fn get_ledger(&self, receiver_id: &UserId) -> Option<SharedLedger> {
        self.ledgers.get(receiver_id).map(|e| e.value().clone())
    }

    pub fn receiver_for_request(&self, request_id: &RequestId) -> Option<UserId> {
        self.request_to_receiver.get(request_id).map(|e| *e.value())
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
    }

    /// WAL-append, then apply, then notify both parties. Nothing is applied if
    /// the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        ledger: &mut ReceiverLedger,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_ledger(ledger, event, &self.request_to_receiver, &self.sent);
        self.notify.send(event.receiver_id(), event);
        self.notify.send(event.requester_id(), event);
        Ok(())
    }

    /// Take the write gate and the receiver's ledger lock, in that order.
    pub(super) async fn lock_for_write(
        &self,
        receiver_id: UserId,
    ) -> (RwLockReadGuard<'_, ()>, OwnedRwLockWriteGuard<ReceiverLedger>) {
        let gate = self.write_gate.read().await;
        let ledger = self.ledger_for(receiver_id).write_owned().await;
        (gate, ledger)
    }

    /// Lookup request → receiver, then lock for write.
    pub(super) async fn lock_request_for_write(
        &self,
        request_id: &RequestId,
    ) -> Result<(RwLockReadGuard<'_, ()>, OwnedRwLockWriteGuard<ReceiverLedger>), EngineError>
    {
        let receiver_id = self
            .receiver_for_request(request_id)
            .ok_or(EngineError::NotFound(*request_id))?;
        Ok(self.lock_for_write(receiver_id).await)
    }

    /// Run a mutation on its own task so that a caller giving up halfway
    /// cannot abandon it between the WAL append and the in-memory apply.
    pub(super) async fn detached<T, F, Fut>(self: &Arc<Self>, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<Engine>) -> Fut,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(op(Arc::clone(self)))
            .await
            .map_err(|e| EngineError::StorageUnavailable(format!("mutation task failed: {e}")))?
    }
}
