//! Ordered conversation-list storage.

use convosync_proto::conversation::{ConversationStatus, ConversationSummary};
use convosync_proto::message::{Message, Participant, UserId};
use tracing::debug;

/// One sidebar entry.
///
/// The key is the id the conversation is addressed by and is not always
/// the profile id in the summary: when the local actor is an end user,
/// every message is filed under the admin pseudo-identity while the
/// profile shows whoever actually wrote.
#[derive(Debug)]
struct Entry {
    key: UserId,
    summary: ConversationSummary,
}

/// The conversation sidebar: summaries ordered most-recently-active
/// first.
///
/// Activity in a conversation promotes it to the front; the relative
/// order of all other entries is preserved. Unread counters only move by
/// clamped deltas — the single exception is [`set_unread`], fed by an
/// authoritative server count.
///
/// [`set_unread`]: ConversationStore::set_unread
#[derive(Debug, Default)]
pub struct ConversationStore {
    entries: Vec<Entry>,
}

impl ConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all entries with an authoritative listing.
    ///
    /// Listings only exist on the admin side, where the conversation key
    /// is the counterpart's profile id.
    pub fn replace_all(&mut self, summaries: Vec<ConversationSummary>) {
        self.entries = summaries
            .into_iter()
            .map(|summary| Entry {
                key: summary.user.id.clone(),
                summary,
            })
            .collect();
    }

    /// Records activity in a conversation and moves it to the front.
    ///
    /// An existing entry keeps its unread counter, status, and user
    /// snapshot; the last message is replaced only if the incoming one is
    /// not older. A missing entry is created from the message, filed
    /// under `key` with `counterpart` as its profile.
    pub fn upsert_and_promote(&mut self, key: &UserId, counterpart: Participant, msg: &Message) {
        let existing = self.entries.iter().position(|e| &e.key == key);
        let mut entry = match existing {
            Some(idx) => self.entries.remove(idx),
            None => {
                debug!(conversation = %key, "new conversation from live message");
                Entry {
                    key: key.clone(),
                    summary: ConversationSummary::new(counterpart, msg.created_at),
                }
            }
        };
        let newer = entry
            .summary
            .last_message
            .as_ref()
            .is_none_or(|last| last.created_at <= msg.created_at);
        if newer {
            entry.summary.last_message = Some(msg.clone());
            entry.summary.updated_at = msg.created_at;
        }
        self.entries.insert(0, entry);
    }

    /// Applies a delta to a conversation's unread counter, clamping at
    /// zero. Unknown keys are ignored.
    pub fn adjust_unread(&mut self, key: &UserId, delta: i64) {
        if let Some(summary) = self.get_mut(key) {
            let current = i64::from(summary.unread_count);
            summary.unread_count = u32::try_from((current + delta).max(0)).unwrap_or(u32::MAX);
        }
    }

    /// Overwrites a conversation's unread counter with a server-supplied
    /// count. Only authoritative fetches may call this.
    pub fn set_unread(&mut self, key: &UserId, count: u32) {
        if let Some(summary) = self.get_mut(key) {
            summary.unread_count = count;
        }
    }

    /// Sets a conversation's lifecycle status. Returns `false` for
    /// unknown keys.
    pub fn set_status(&mut self, key: &UserId, status: ConversationStatus) -> bool {
        match self.get_mut(key) {
            Some(summary) => {
                summary.status = status;
                true
            }
            None => false,
        }
    }

    /// Removes a conversation. Returns `false` for unknown keys.
    pub fn remove(&mut self, key: &UserId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.key != key);
        self.entries.len() < before
    }

    /// Looks up one summary by conversation key.
    #[must_use]
    pub fn get(&self, key: &UserId) -> Option<&ConversationSummary> {
        self.entries
            .iter()
            .find(|e| &e.key == key)
            .map(|e| &e.summary)
    }

    /// All summaries, most recently active first.
    #[must_use]
    pub fn summaries(&self) -> Vec<&ConversationSummary> {
        self.entries.iter().map(|e| &e.summary).collect()
    }

    /// Owned copy of all summaries, most recently active first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConversationSummary> {
        self.entries.iter().map(|e| e.summary.clone()).collect()
    }

    /// Summaries filtered by lifecycle status, order preserved.
    #[must_use]
    pub fn with_status(&self, status: ConversationStatus) -> Vec<&ConversationSummary> {
        self.entries
            .iter()
            .filter(|e| e.summary.status == status)
            .map(|e| &e.summary)
            .collect()
    }

    /// Sum of unread counters across all conversations.
    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| u64::from(e.summary.unread_count))
            .sum()
    }

    fn get_mut(&mut self, key: &UserId) -> Option<&mut ConversationSummary> {
        self.entries
            .iter_mut()
            .find(|e| &e.key == key)
            .map(|e| &mut e.summary)
    }
}
