use super::*;
use crate::limits::*;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

const H: Ms = 3_600_000; // 1 hour in ms
const BASE: Ms = 1_717_372_800_000; // 2024-06-03T00:00:00Z, a Monday

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("swapslot_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Arc<Engine> {
    let notify = Arc::new(NotifyHub::new());
    Arc::new(Engine::new(test_wal_path(name), notify).unwrap())
}

fn window(receiver: UserId, start: Ms, end: Ms) -> ConcreteWindow {
    ConcreteWindow::new(receiver, start, end)
}

async fn pending(engine: &Arc<Engine>, receiver: UserId, start: Ms, end: Ms) -> SwapRequest {
    engine
        .create_swap_request(Ulid::new(), receiver, window(receiver, start, end), None)
        .await
        .unwrap()
}

// ── Create + conflict guard ──────────────────────────────

#[tokio::test]
async fn create_inserts_pending_request_and_reservation() {
    let engine = new_engine("create_pending.wal");
    let requester = Ulid::new();
    let receiver = Ulid::new();

    let request = engine
        .create_swap_request(
            requester,
            receiver,
            window(receiver, BASE + 9 * H, BASE + 10 * H),
            Some("trade Rust for Spanish?".into()),
        )
        .await
        .unwrap();

    assert_eq!(request.status, SwapStatus::Pending);
    assert_eq!(request.requester_id, requester);
    assert_eq!(request.receiver_id, receiver);
    assert_eq!(request.message.as_deref(), Some("trade Rust for Spanish?"));
    assert_eq!(request.created_at, request.updated_at);

    assert_eq!(engine.get_swap_request(request.id).await.unwrap(), request);
    let reservations = engine.active_reservations(receiver).await;
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].request_id, request.id);
    assert_eq!(reservations[0].span, Span::new(BASE + 9 * H, BASE + 10 * H));
}

#[tokio::test]
async fn identical_window_reports_existing_request() {
    let engine = new_engine("identical_conflict.wal");
    let receiver = Ulid::new();
    let first = pending(&engine, receiver, BASE + 9 * H, BASE + 10 * H).await;

    let err = engine
        .create_swap_request(
            Ulid::new(),
            receiver,
            window(receiver, BASE + 9 * H, BASE + 10 * H),
            None,
        )
        .await
        .unwrap_err();
    match err {
        EngineError::SlotAlreadyBooked { existing, status } => {
            assert_eq!(existing, first.id);
            assert_eq!(status, SwapStatus::Pending);
        }
        other => panic!("expected SlotAlreadyBooked, got {other:?}"),
    }
    assert_eq!(engine.received_requests(receiver).await.len(), 1);
}

#[tokio::test]
async fn overlapping_window_conflicts() {
    let engine = new_engine("overlap_conflict.wal");
    let receiver = Ulid::new();
    let first = pending(&engine, receiver, BASE + 9 * H, BASE + 10 * H).await;

    let err = engine
        .create_swap_request(
            Ulid::new(),
            receiver,
            window(receiver, BASE + 9 * H + H / 2, BASE + 11 * H),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotAlreadyBooked { existing, .. } if existing == first.id));

    // Touching windows do not overlap.
    assert_ok!(
        engine
            .create_swap_request(
                Ulid::new(),
                receiver,
                window(receiver, BASE + 10 * H, BASE + 11 * H),
                None,
            )
            .await
    );
}

#[tokio::test]
async fn same_window_on_different_receivers_is_independent() {
    let engine = new_engine("independent_receivers.wal");
    let a = Ulid::new();
    let b = Ulid::new();
    pending(&engine, a, BASE, BASE + H).await;
    pending(&engine, b, BASE, BASE + H).await;
    assert_eq!(engine.active_reservations(a).await.len(), 1);
    assert_eq!(engine.active_reservations(b).await.len(), 1);
}

#[tokio::test]
async fn conflict_reports_accepted_holder() {
    let engine = new_engine("conflict_accepted.wal");
    let receiver = Ulid::new();
    let first = pending(&engine, receiver, BASE, BASE + H).await;
    engine.accept_swap_request(first.id, receiver).await.unwrap();

    let err = engine
        .create_swap_request(Ulid::new(), receiver, window(receiver, BASE, BASE + H), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::SlotAlreadyBooked { existing, status: SwapStatus::Accepted } if existing == first.id
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_for_one_window_admit_exactly_one() {
    let engine = new_engine("concurrent_creates.wal");
    let receiver = Ulid::new();

    let n = 32;
    let mut handles = Vec::new();
    for _ in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_swap_request(
                Ulid::new(),
                receiver,
                window(receiver, BASE + 9 * H, BASE + 10 * H),
                None,
            )
            .await
        }));
    }

    let mut winners = Vec::new();
    let mut conflicts = Vec::new();
    for h in handles {
        match h.await.unwrap() {
            Ok(request) => winners.push(request),
            Err(EngineError::SlotAlreadyBooked { existing, status }) => {
                conflicts.push((existing, status))
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts.len(), n - 1);
    let winner = &winners[0];
    assert!(
        conflicts
            .iter()
            .all(|&(existing, status)| existing == winner.id && status == SwapStatus::Pending)
    );
    assert_eq!(engine.active_reservations(receiver).await.len(), 1);
    assert_eq!(engine.received_requests(receiver).await.len(), 1);
}

#[tokio::test]
async fn create_validation() {
    let engine = new_engine("create_validation.wal");
    let user = Ulid::new();
    let other = Ulid::new();

    let err = engine
        .create_swap_request(user, user, window(user, BASE, BASE + H), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    // Window belongs to somebody other than the receiver.
    let err = engine
        .create_swap_request(user, other, window(Ulid::new(), BASE, BASE + H), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let err = engine
        .create_swap_request(
            user,
            other,
            window(other, BASE, BASE + H),
            Some("x".repeat(MAX_MESSAGE_LEN + 1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let err = engine
        .create_swap_request(
            user,
            other,
            ConcreteWindow {
                owner_id: other,
                span: Span { start: BASE + H, end: BASE },
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    assert!(engine.active_reservations(other).await.is_empty());
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

// ── State machine ────────────────────────────────────────

#[tokio::test]
async fn receiver_accepts_pending() {
    let engine = new_engine("accept.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;

    let accepted = engine.accept_swap_request(request.id, receiver).await.unwrap();
    assert_eq!(accepted.status, SwapStatus::Accepted);
    assert!(accepted.updated_at >= request.updated_at);
    // Accepted still holds the window.
    assert_eq!(engine.active_reservations(receiver).await.len(), 1);
}

#[tokio::test]
async fn requester_cannot_accept_or_reject() {
    let engine = new_engine("requester_accept.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;
    let appends = engine.wal_appends_since_compact().await;

    let err = engine
        .accept_swap_request(request.id, request.requester_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Unauthorized { id, actor } if id == request.id && actor == request.requester_id
    ));
    assert_err!(engine.reject_swap_request(request.id, request.requester_id).await);

    let unchanged = engine.get_swap_request(request.id).await.unwrap();
    assert_eq!(unchanged, request);
    assert_eq!(engine.wal_appends_since_compact().await, appends);
}

#[tokio::test]
async fn stranger_cannot_cancel() {
    let engine = new_engine("stranger_cancel.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;

    let err = engine
        .cancel_swap_request(request.id, Ulid::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));
    assert_eq!(
        engine.get_swap_request(request.id).await.unwrap().status,
        SwapStatus::Pending
    );
}

#[tokio::test]
async fn unauthorized_wins_over_invalid_transition() {
    let engine = new_engine("auth_before_state.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;
    engine.reject_swap_request(request.id, receiver).await.unwrap();

    let err = engine
        .accept_swap_request(request.id, request.requester_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized { .. }));
}

#[tokio::test]
async fn reject_releases_window_for_rebooking() {
    let engine = new_engine("reject_release.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;

    let rejected = engine.reject_swap_request(request.id, receiver).await.unwrap();
    assert_eq!(rejected.status, SwapStatus::Rejected);
    assert!(engine.active_reservations(receiver).await.is_empty());

    let rebooked = pending(&engine, receiver, BASE, BASE + H).await;
    assert_ne!(rebooked.id, request.id);
}

#[tokio::test]
async fn cancel_then_rebook_same_window() {
    let engine = new_engine("cancel_rebook.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;

    let cancelled = engine
        .cancel_swap_request(request.id, request.requester_id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, SwapStatus::Cancelled);

    assert_ok!(
        engine
            .create_swap_request(Ulid::new(), receiver, window(receiver, BASE, BASE + H), None)
            .await
    );
}

#[tokio::test]
async fn receiver_cancels_accepted() {
    let engine = new_engine("cancel_accepted.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;
    engine.accept_swap_request(request.id, receiver).await.unwrap();

    let cancelled = engine.cancel_swap_request(request.id, receiver).await.unwrap();
    assert_eq!(cancelled.status, SwapStatus::Cancelled);
    assert!(engine.active_reservations(receiver).await.is_empty());
}

#[tokio::test]
async fn terminal_states_reject_further_transitions() {
    let engine = new_engine("terminal.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;
    engine.reject_swap_request(request.id, receiver).await.unwrap();

    let err = engine
        .cancel_swap_request(request.id, receiver)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: SwapStatus::Rejected,
            to: SwapStatus::Cancelled,
            ..
        }
    ));
    assert_err!(engine.accept_swap_request(request.id, receiver).await);
    assert_err!(engine.complete_swap_request(request.id, BASE + 2 * H).await);
}

#[tokio::test]
async fn double_accept_is_invalid() {
    let engine = new_engine("double_accept.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;
    engine.accept_swap_request(request.id, receiver).await.unwrap();

    let err = engine
        .accept_swap_request(request.id, receiver)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: SwapStatus::Accepted,
            to: SwapStatus::Accepted,
            ..
        }
    ));
}

#[tokio::test]
async fn complete_requires_elapsed_window() {
    let engine = new_engine("complete.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;

    // PENDING cannot complete even after the window ends.
    let err = engine
        .complete_swap_request(request.id, BASE + 2 * H)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    engine.accept_swap_request(request.id, receiver).await.unwrap();

    let err = engine
        .complete_swap_request(request.id, BASE + H - 1)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    let completed = engine
        .complete_swap_request(request.id, BASE + H)
        .await
        .unwrap();
    assert_eq!(completed.status, SwapStatus::Completed);
    assert_eq!(completed.updated_at, BASE + H);
    assert!(engine.active_reservations(receiver).await.is_empty());

    // Completing again is a no-op.
    let appends = engine.wal_appends_since_compact().await;
    let again = engine
        .complete_swap_request(request.id, BASE + 5 * H)
        .await
        .unwrap();
    assert_eq!(again, completed);
    assert_eq!(engine.wal_appends_since_compact().await, appends);
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let engine = new_engine("not_found.wal");
    let id = Ulid::new();
    assert!(matches!(
        engine.accept_swap_request(id, Ulid::new()).await,
        Err(EngineError::NotFound(missing)) if missing == id
    ));
    assert!(matches!(
        engine.get_swap_request(id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_accept_and_cancel_end_cancelled() {
    let engine = new_engine("accept_cancel_race.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;

    let accept = {
        let eng = engine.clone();
        tokio::spawn(async move { eng.accept_swap_request(request.id, receiver).await })
    };
    let cancel = {
        let eng = engine.clone();
        let requester = request.requester_id;
        tokio::spawn(async move { eng.cancel_swap_request(request.id, requester).await })
    };
    let accept = accept.await.unwrap();
    assert_ok!(cancel.await.unwrap());
    if let Err(e) = accept {
        assert!(matches!(e, EngineError::InvalidTransition { .. }));
    }

    let final_state = engine.get_swap_request(request.id).await.unwrap();
    assert_eq!(final_state.status, SwapStatus::Cancelled);
    assert!(engine.active_reservations(receiver).await.is_empty());
}

// ── Sweeper ──────────────────────────────────────────────

#[tokio::test]
async fn sweep_completes_only_elapsed_accepted() {
    let engine = new_engine("sweep.wal");
    let receiver = Ulid::new();
    let elapsed = pending(&engine, receiver, BASE, BASE + H).await;
    let upcoming = pending(&engine, receiver, BASE + 5 * H, BASE + 6 * H).await;
    let still_pending = pending(&engine, receiver, BASE + 2 * H, BASE + 3 * H).await;
    engine.accept_swap_request(elapsed.id, receiver).await.unwrap();
    engine.accept_swap_request(upcoming.id, receiver).await.unwrap();

    let now = BASE + 4 * H;
    assert_eq!(engine.sweep_completions(now).await, 1);
    assert_eq!(engine.sweep_completions(now).await, 0);

    let status = |r: SwapRequest| r.status;
    assert_eq!(
        status(engine.get_swap_request(elapsed.id).await.unwrap()),
        SwapStatus::Completed
    );
    assert_eq!(
        status(engine.get_swap_request(upcoming.id).await.unwrap()),
        SwapStatus::Accepted
    );
    assert_eq!(
        status(engine.get_swap_request(still_pending.id).await.unwrap()),
        SwapStatus::Pending
    );
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn sent_and_received_in_creation_order() {
    let engine = new_engine("queries.wal");
    let requester = Ulid::new();
    let alice = Ulid::new();
    let bob = Ulid::new();

    let r1 = engine
        .create_swap_request(requester, alice, window(alice, BASE, BASE + H), None)
        .await
        .unwrap();
    let r2 = engine
        .create_swap_request(requester, bob, window(bob, BASE, BASE + H), None)
        .await
        .unwrap();
    let r3 = pending(&engine, alice, BASE + H, BASE + 2 * H).await;

    let sent: Vec<_> = engine
        .sent_requests(requester)
        .await
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(sent, vec![r1.id, r2.id]);

    let received: Vec<_> = engine
        .received_requests(alice)
        .await
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(received, vec![r1.id, r3.id]);

    assert!(engine.sent_requests(Ulid::new()).await.is_empty());
    assert!(engine.received_requests(Ulid::new()).await.is_empty());
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn both_parties_are_notified() {
    let engine = new_engine("notify.wal");
    let requester = Ulid::new();
    let receiver = Ulid::new();
    let mut requester_rx = engine.notify.subscribe(requester);
    let mut receiver_rx = engine.notify.subscribe(receiver);

    let request = engine
        .create_swap_request(requester, receiver, window(receiver, BASE, BASE + H), None)
        .await
        .unwrap();
    engine.accept_swap_request(request.id, receiver).await.unwrap();

    for rx in [&mut requester_rx, &mut receiver_rx] {
        let created = rx.recv().await.unwrap();
        assert!(matches!(created, Event::RequestCreated { id, .. } if id == request.id));
        let accepted = rx.recv().await.unwrap();
        assert!(matches!(
            accepted,
            Event::RequestTransitioned { status: SwapStatus::Accepted, .. }
        ));
    }
}

#[tokio::test]
async fn failed_transition_sends_nothing() {
    let engine = new_engine("notify_failure.wal");
    let receiver = Ulid::new();
    let request = pending(&engine, receiver, BASE, BASE + H).await;
    let mut rx = engine.notify.subscribe(receiver);

    assert_err!(engine.accept_swap_request(request.id, Ulid::new()).await);
    assert!(rx.try_recv().is_err());
}

// ── WAL replay + compaction ──────────────────────────────

#[tokio::test]
async fn replay_restores_requests_and_reservations() {
    let path = test_wal_path("replay.wal");
    let notify = Arc::new(NotifyHub::new());
    let receiver = Ulid::new();

    let (accepted, rejected, sent_by) = {
        let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());
        let a = pending(&engine, receiver, BASE, BASE + H).await;
        let b = pending(&engine, receiver, BASE + H, BASE + 2 * H).await;
        engine.accept_swap_request(a.id, receiver).await.unwrap();
        engine.reject_swap_request(b.id, receiver).await.unwrap();
        (a.id, b.id, a.requester_id)
    };

    let engine = Arc::new(Engine::new(path, notify).unwrap());
    assert_eq!(
        engine.get_swap_request(accepted).await.unwrap().status,
        SwapStatus::Accepted
    );
    assert_eq!(
        engine.get_swap_request(rejected).await.unwrap().status,
        SwapStatus::Rejected
    );
    let reservations = engine.active_reservations(receiver).await;
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].request_id, accepted);
    assert_eq!(engine.sent_requests(sent_by).await.len(), 1);

    // The replayed guard still protects the accepted window.
    let err = engine
        .create_swap_request(Ulid::new(), receiver, window(receiver, BASE, BASE + H), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotAlreadyBooked { existing, .. } if existing == accepted));
}

#[tokio::test]
async fn compaction_preserves_state_across_replay() {
    let path = test_wal_path("compact_replay.wal");
    let notify = Arc::new(NotifyHub::new());
    let receiver = Ulid::new();

    let before = {
        let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());
        let a = pending(&engine, receiver, BASE, BASE + H).await;
        let b = pending(&engine, receiver, BASE + H, BASE + 2 * H).await;
        let c = pending(&engine, receiver, BASE + 2 * H, BASE + 3 * H).await;
        engine.accept_swap_request(a.id, receiver).await.unwrap();
        engine.complete_swap_request(a.id, BASE + H).await.unwrap();
        engine.cancel_swap_request(b.id, b.requester_id).await.unwrap();
        let _ = c;

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        engine.received_requests(receiver).await
    };

    // created x3 + one final transition for each non-pending request
    assert_eq!(crate::wal::Wal::replay(&path).unwrap().len(), 5);

    let engine = Arc::new(Engine::new(path, notify).unwrap());
    assert_eq!(engine.received_requests(receiver).await, before);
    let reservations = engine.active_reservations(receiver).await;
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].span, Span::new(BASE + 2 * H, BASE + 3 * H));
}

fn created_event(id: RequestId, receiver: UserId, span: Span, at: Ms) -> Event {
    Event::RequestCreated {
        id,
        requester_id: Ulid::new(),
        receiver_id: receiver,
        span,
        message: None,
        at,
    }
}

#[tokio::test]
async fn replay_drops_create_overlapping_live_reservation() {
    let path = test_wal_path("replay_overlap.wal");
    let receiver = Ulid::new();
    let (first, second) = (Ulid::new(), Ulid::new());
    {
        // A create whose commit failed but still reached disk, then its retry.
        let mut wal = crate::wal::Wal::open(&path).unwrap();
        wal.append(&created_event(first, receiver, Span::new(BASE, BASE + H), 1))
            .unwrap();
        wal.append(&created_event(second, receiver, Span::new(BASE + H / 2, BASE + H), 2))
            .unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let reservations = engine.active_reservations(receiver).await;
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].request_id, first);
    assert_eq!(engine.received_requests(receiver).await.len(), 1);
    assert!(matches!(
        engine.get_swap_request(second).await,
        Err(EngineError::NotFound(id)) if id == second
    ));
}

#[tokio::test]
async fn compaction_keeps_finished_request_sharing_a_timestamp() {
    let path = test_wal_path("compact_tie.wal");
    let notify = Arc::new(NotifyHub::new());
    let receiver = Ulid::new();
    let span = Span::new(BASE, BASE + H);
    let mut ids = [Ulid::new(), Ulid::new()];
    ids.sort();
    // The live request sorts first on (created_at, id).
    let (live, cancelled) = (ids[0], ids[1]);
    {
        let mut wal = crate::wal::Wal::open(&path).unwrap();
        wal.append(&created_event(cancelled, receiver, span, 5)).unwrap();
        wal.append(&Event::RequestTransitioned {
            id: cancelled,
            requester_id: Ulid::new(),
            receiver_id: receiver,
            status: SwapStatus::Cancelled,
            at: 5,
        })
        .unwrap();
        wal.append(&created_event(live, receiver, span, 5)).unwrap();
    }

    let engine = Engine::new(path.clone(), notify.clone()).unwrap();
    assert_eq!(engine.received_requests(receiver).await.len(), 2);
    engine.compact_wal().await.unwrap();
    drop(engine);

    let engine = Engine::new(path, notify).unwrap();
    assert_eq!(engine.received_requests(receiver).await.len(), 2);
    assert_eq!(
        engine.get_swap_request(cancelled).await.unwrap().status,
        SwapStatus::Cancelled
    );
    let reservations = engine.active_reservations(receiver).await;
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].request_id, live);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn group_commit_survives_concurrent_receivers() {
    let path = test_wal_path("group_commit.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());

    let receivers: Vec<UserId> = (0..20).map(|_| Ulid::new()).collect();
    let mut handles = Vec::new();
    for &receiver in &receivers {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_swap_request(Ulid::new(), receiver, window(receiver, BASE, BASE + H), None)
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.wal_appends_since_compact().await, receivers.len() as u64);

    let engine2 = Engine::new(path, notify).unwrap();
    for receiver in receivers {
        assert_eq!(engine2.active_reservations(receiver).await.len(), 1);
    }
}
