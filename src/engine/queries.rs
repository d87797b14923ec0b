use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_swap_request(&self, request_id: RequestId) -> Result<SwapRequest, EngineError> {
        let receiver_id = self
            .receiver_for_request(&request_id)
            .ok_or(EngineError::NotFound(request_id))?;
        let ledger = self
            .get_ledger(&receiver_id)
            .ok_or(EngineError::NotFound(request_id))?;
        let guard = ledger.read().await;
        guard
            .requests
            .get(&request_id)
            .cloned()
            .ok_or(EngineError::NotFound(request_id))
    }

    /// Requests `user_id` sent, oldest first.
    pub async fn sent_requests(&self, user_id: UserId) -> Vec<SwapRequest> {
        let ids = self
            .sent
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(request) = self.get_swap_request(id).await {
                out.push(request);
            }
        }
        // Compaction rewrites the log out of creation order.
        out.sort_by_key(|r| (r.created_at, r.id));
        out
    }

    /// Requests addressed to `user_id`, oldest first.
    pub async fn received_requests(&self, user_id: UserId) -> Vec<SwapRequest> {
        let Some(ledger) = self.get_ledger(&user_id) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        let mut out: Vec<SwapRequest> = guard.requests.values().cloned().collect();
        out.sort_by_key(|r| (r.created_at, r.id));
        out
    }

    /// Windows currently held on `receiver_id`, by start time.
    pub async fn active_reservations(&self, receiver_id: UserId) -> Vec<Reservation> {
        match self.get_ledger(&receiver_id) {
            Some(ledger) => ledger.read().await.reservations.clone(),
            None => Vec::new(),
        }
    }

    /// ACCEPTED requests whose window has ended by `now`.
    pub(super) async fn collect_elapsed_accepted(&self, now: Ms) -> Vec<RequestId> {
        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut elapsed = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            // Only active requests hold reservations; skip the rest cheaply.
            for reservation in guard.reservations.iter().filter(|r| r.span.end <= now) {
                if let Some(request) = guard.requests.get(&reservation.request_id)
                    && request.status == SwapStatus::Accepted
                {
                    elapsed.push(request.id);
                }
            }
        }
        elapsed
    }
}
