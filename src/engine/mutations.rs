use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::guard::{check_capacity, try_reserve, validate_window};
use super::{now_ms, Engine, EngineError, WalCommand};

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy)]
enum Actor {
    /// Must be the request's receiver.
    Receiver(UserId),
    /// Either requester or receiver.
    Party(UserId),
    /// Scheduler-driven; no identity check.
    System,
}

impl Actor {
    fn authorize(self, request: &SwapRequest) -> Result<(), EngineError> {
        let (actor, allowed) = match self {
            Actor::Receiver(actor) => (actor, actor == request.receiver_id),
            Actor::Party(actor) => (actor, request.is_party(actor)),
            Actor::System => return Ok(()),
        };
        if allowed {
            Ok(())
        } else {
            Err(EngineError::Unauthorized {
                id: request.id,
                actor,
            })
        }
    }
}

fn validate_new_request(
    requester_id: UserId,
    receiver_id: UserId,
    window: &ConcreteWindow,
    message: Option<&str>,
) -> Result<(), EngineError> {
    if requester_id == receiver_id {
        return Err(EngineError::InvalidInput(
            "cannot request a swap with yourself".into(),
        ));
    }
    if window.owner_id != receiver_id {
        return Err(EngineError::InvalidInput(
            "window does not belong to the receiver".into(),
        ));
    }
    validate_window(&window.span)?;
    if message.is_some_and(|m| m.len() > MAX_MESSAGE_LEN) {
        return Err(EngineError::LimitExceeded("message too long"));
    }
    Ok(())
}

impl Engine {
    /// Reserve `window` on the receiver and create a PENDING request for it, as
    /// one unit. Fails with `SlotAlreadyBooked` if an active request holds the
    /// window or overlaps it.
    pub async fn create_swap_request(
        self: &Arc<Self>,
        requester_id: UserId,
        receiver_id: UserId,
        window: ConcreteWindow,
        message: Option<String>,
    ) -> Result<SwapRequest, EngineError> {
        validate_new_request(requester_id, receiver_id, &window, message.as_deref())?;
        self.detached(move |engine| async move {
            engine
                .create_in_place(requester_id, receiver_id, window, message)
                .await
        })
        .await
    }

    async fn create_in_place(
        &self,
        requester_id: UserId,
        receiver_id: UserId,
        window: ConcreteWindow,
        message: Option<String>,
    ) -> Result<SwapRequest, EngineError> {
        let (_gate, mut ledger) = self.lock_for_write(receiver_id).await;
        check_capacity(&ledger)?;
        let reserved = try_reserve(&ledger, &window.span)?;

        let id = Ulid::new();
        let event = Event::RequestCreated {
            id,
            requester_id,
            receiver_id,
            span: reserved.span,
            message,
            at: now_ms(),
        };
        self.persist_and_apply(&mut ledger, &event).await?;

        metrics::counter!(crate::observability::REQUESTS_CREATED_TOTAL).increment(1);
        info!(request_id = %id, %requester_id, %receiver_id, "swap request created");
        ledger
            .requests
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn accept_swap_request(
        self: &Arc<Self>,
        request_id: RequestId,
        actor_id: UserId,
    ) -> Result<SwapRequest, EngineError> {
        self.transition(request_id, Actor::Receiver(actor_id), SwapStatus::Accepted, now_ms())
            .await
            .map(|(request, _)| request)
    }

    pub async fn reject_swap_request(
        self: &Arc<Self>,
        request_id: RequestId,
        actor_id: UserId,
    ) -> Result<SwapRequest, EngineError> {
        self.transition(request_id, Actor::Receiver(actor_id), SwapStatus::Rejected, now_ms())
            .await
            .map(|(request, _)| request)
    }

    pub async fn cancel_swap_request(
        self: &Arc<Self>,
        request_id: RequestId,
        actor_id: UserId,
    ) -> Result<SwapRequest, EngineError> {
        self.transition(request_id, Actor::Party(actor_id), SwapStatus::Cancelled, now_ms())
            .await
            .map(|(request, _)| request)
    }

    /// Mark an ACCEPTED request COMPLETED once its window has ended.
    /// A request that is already COMPLETED is returned unchanged.
    pub async fn complete_swap_request(
        self: &Arc<Self>,
        request_id: RequestId,
        now: Ms,
    ) -> Result<SwapRequest, EngineError> {
        self.transition(request_id, Actor::System, SwapStatus::Completed, now)
            .await
            .map(|(request, _)| request)
    }

    /// Complete every ACCEPTED request whose window ended at or before `now`.
    /// Returns how many requests this call moved to COMPLETED.
    pub async fn sweep_completions(self: &Arc<Self>, now: Ms) -> usize {
        let mut completed = 0;
        for request_id in self.collect_elapsed_accepted(now).await {
            match self
                .transition(request_id, Actor::System, SwapStatus::Completed, now)
                .await
            {
                Ok((_, true)) => completed += 1,
                Ok((_, false)) => {}
                Err(e @ EngineError::StorageUnavailable(_)) => {
                    warn!(%request_id, "sweep could not complete request: {e}");
                }
                // Cancelled between collection and transition.
                Err(e) => debug!(%request_id, "sweep skip: {e}"),
            }
        }
        if completed > 0 {
            info!(completed, "sweep completed elapsed sessions");
        }
        completed
    }

    /// Returns the request after the call and whether this call changed it.
    async fn transition(
        self: &Arc<Self>,
        request_id: RequestId,
        actor: Actor,
        next: SwapStatus,
        now: Ms,
    ) -> Result<(SwapRequest, bool), EngineError> {
        self.detached(move |engine| async move {
            engine.transition_in_place(request_id, actor, next, now).await
        })
        .await
    }

    async fn transition_in_place(
        &self,
        request_id: RequestId,
        actor: Actor,
        next: SwapStatus,
        now: Ms,
    ) -> Result<(SwapRequest, bool), EngineError> {
        let (_gate, mut ledger) = self.lock_request_for_write(&request_id).await?;
        let request = ledger
            .requests
            .get(&request_id)
            .ok_or(EngineError::NotFound(request_id))?;

        actor.authorize(request)?;

        let invalid = || EngineError::InvalidTransition {
            id: request_id,
            from: request.status,
            to: next,
        };
        if next == SwapStatus::Completed {
            if request.status == SwapStatus::Completed {
                return Ok((request.clone(), false));
            }
            if request.window.span.end > now {
                return Err(invalid());
            }
        }
        if !request.status.can_transition_to(next) {
            return Err(invalid());
        }

        let from = request.status;
        let event = Event::RequestTransitioned {
            id: request_id,
            requester_id: request.requester_id,
            receiver_id: request.receiver_id,
            status: next,
            at: now,
        };
        self.persist_and_apply(&mut ledger, &event).await?;

        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "to" => next.as_str())
            .increment(1);
        info!(%request_id, %from, to = %next, "swap request transitioned");
        let updated = ledger
            .requests
            .get(&request_id)
            .cloned()
            .ok_or(EngineError::NotFound(request_id))?;
        Ok((updated, true))
    }

    /// Compact the WAL down to one create (plus at most one transition) per request.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.write_gate.write().await;

        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut requests = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            requests.extend(guard.requests.values().cloned());
        }
        // Finished requests first: each created/terminal pair releases its
        // window at once, so live reservations replay against a clear ledger.
        requests.sort_by_key(|r| (!r.status.is_terminal(), r.created_at, r.id));

        let mut events = Vec::with_capacity(requests.len());
        for r in requests {
            events.push(Event::RequestCreated {
                id: r.id,
                requester_id: r.requester_id,
                receiver_id: r.receiver_id,
                span: r.window.span,
                message: r.message,
                at: r.created_at,
            });
            if r.status != SwapStatus::Pending {
                events.push(Event::RequestTransitioned {
                    id: r.id,
                    requester_id: r.requester_id,
                    receiver_id: r.receiver_id,
                    status: r.status,
                    at: r.updated_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
