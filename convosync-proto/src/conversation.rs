//! Conversation summaries as shown in the admin console's sidebar.

use serde::{Deserialize, Serialize};

use crate::message::{Message, Participant, Timestamp};

/// Lifecycle state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Normal, visible conversation.
    Active,
    /// Archived by the admin; hidden from the default listing.
    Archived,
    /// Closed by the server.
    Closed,
}

impl ConversationStatus {
    /// Lowercase wire/query representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the conversation list: the counterpart, the most recent
/// message, and the locally maintained unread counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// Profile snapshot of the counterpart user.
    pub user: Participant,
    /// The newest message in the conversation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Count of inbound messages not yet read locally.
    #[serde(default)]
    pub unread_count: u32,
    /// Lifecycle state.
    #[serde(default = "default_status")]
    pub status: ConversationStatus,
    /// When the conversation last changed.
    pub updated_at: Timestamp,
}

const fn default_status() -> ConversationStatus {
    ConversationStatus::Active
}

impl ConversationSummary {
    /// Creates a fresh summary around a counterpart with no history.
    pub fn new(user: Participant, updated_at: Timestamp) -> Self {
        Self {
            user,
            last_message: None,
            unread_count: 0,
            status: ConversationStatus::Active,
            updated_at,
        }
    }
}
