//! Per-counterpart typing indicators with automatic expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use convosync_proto::message::UserId;
use parking_lot::Mutex;

#[derive(Debug)]
struct TypingEntry {
    is_typing: bool,
    generation: u64,
}

/// Tracks which counterparts are currently typing.
///
/// A `start` indicator expires on its own after the configured timeout,
/// covering the case where the explicit `stop` never arrives. Each
/// update bumps a per-user generation so a stale expiry timer can never
/// clear a newer indicator.
#[derive(Debug, Clone)]
pub struct TypingTracker {
    entries: Arc<Mutex<HashMap<UserId, TypingEntry>>>,
    timeout: Duration,
}

impl TypingTracker {
    /// Creates a tracker whose `start` indicators expire after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Applies a typing indicator for one counterpart.
    ///
    /// Starting schedules an expiry task; stopping clears immediately.
    pub fn set(&self, user_id: UserId, is_typing: bool) {
        let generation = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(user_id.clone()).or_insert(TypingEntry {
                is_typing: false,
                generation: 0,
            });
            entry.generation += 1;
            entry.is_typing = is_typing;
            entry.generation
        };

        if is_typing {
            let entries = Arc::clone(&self.entries);
            let timeout = self.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let mut entries = entries.lock();
                if let Some(entry) = entries.get_mut(&user_id)
                    && entry.generation == generation
                {
                    entry.is_typing = false;
                }
            });
        }
    }

    /// Whether a counterpart is currently typing.
    #[must_use]
    pub fn is_typing(&self, user_id: &UserId) -> bool {
        self.entries
            .lock()
            .get(user_id)
            .is_some_and(|e| e.is_typing)
    }

    /// Clears all indicators, e.g. when the connection drops.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
