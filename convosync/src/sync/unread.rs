//! Bounded message-id ledgers for once-only accounting.

use std::collections::{HashSet, VecDeque};

use convosync_proto::message::MessageId;

/// Maximum number of marked ids retained before the oldest are evicted.
const MAX_MARKED_TRACKING: usize = 10_000;

/// Records which message ids have already been accounted for.
///
/// Used twice by the reconciler: once to guarantee a local mark-read
/// decrements its unread counter exactly once per id no matter how many
/// times it is requested, and once to deduplicate live deliveries when
/// no open view is tracking the conversation. Bounded FIFO eviction
/// keeps memory flat on long sessions.
#[derive(Debug, Default)]
pub struct UnreadLedger {
    marked: HashSet<MessageId>,
    order: VecDeque<MessageId>,
}

impl UnreadLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an id as marked. Returns `true` only the first time the id
    /// is seen — the caller applies the counter delta on `true` only.
    pub fn mark(&mut self, id: &MessageId) -> bool {
        if !self.marked.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id.clone());
        if self.order.len() > MAX_MARKED_TRACKING
            && let Some(oldest) = self.order.pop_front()
        {
            self.marked.remove(&oldest);
        }
        true
    }

    /// Whether an id has already been marked.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.marked.contains(id)
    }
}
