use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, UserId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-user broadcast of swap request events. Both parties of a request are
/// notified of every persisted change to it.
pub struct NotifyHub {
    channels: DashMap<UserId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a user's events. Creates the channel if needed.
    pub fn subscribe(&self, user_id: UserId) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, user_id: UserId, event: &Event) {
        if let Some(sender) = self.channels.get(&user_id) {
            let _ = sender.send(event.clone());
        }
    }
}
