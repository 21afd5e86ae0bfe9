//! Message and identity types for the `ConvoSync` data model.
//!
//! These types mirror the shapes exchanged with the backend: the REST
//! history/send endpoints and the live event channel both carry the same
//! JSON message objects, so a single [`Message`] type serves both
//! boundaries. The server is the sole identifier authority — a
//! [`MessageId`] is an opaque server-assigned string and the only
//! deduplication key in the system.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message content length in characters.
pub const MAX_CONTENT_LEN: usize = 16 * 1024;

/// Prefix carried by locally generated provisional message identifiers.
const PROVISIONAL_PREFIX: &str = "local-";

/// Well-known pseudo-identity for the admin side of a conversation.
const ADMIN_ID: &str = "admin";

/// Opaque, server-assigned unique identifier for a message.
///
/// The sole deduplication key: a message with a given id, once known to a
/// store, is never duplicated regardless of how many times it is observed
/// (history fetch, live push, optimistic echo).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps a server-assigned identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a provisional identifier for an optimistic local echo.
    ///
    /// Provisional ids are `local-`-prefixed UUIDv7 values, so they can
    /// never collide with a server-assigned id and remain time-ordered.
    #[must_use]
    pub fn provisional() -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{}", Uuid::now_v7()))
    }

    /// Whether this id was generated locally and not yet confirmed by the
    /// server.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    /// Returns the string representation of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a user, or the well-known `"admin"` pseudo-identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wraps a user identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The well-known admin pseudo-identity, used as the conversation key
    /// in the single-thread user-facing mode.
    #[must_use]
    pub fn admin() -> Self {
        Self(ADMIN_ID.to_string())
    }

    /// Whether this is the admin pseudo-identity.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.0 == ADMIN_ID
    }

    /// Returns the string representation of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The local actor's identity descriptor, as carried in the channel
/// handshake.
///
/// Admins consume the multi-conversation console; everyone else sees the
/// single admin thread. The flag decides which side of a message counts
/// as "ours" when the receiver is the admin pseudo-identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// The actor's own user identifier.
    pub user_id: UserId,
    /// Whether the actor acts as the admin side.
    pub admin: bool,
}

impl LocalIdentity {
    /// Creates a non-admin (end-user) identity.
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            admin: false,
        }
    }

    /// Creates an admin identity.
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            admin: true,
        }
    }
}

/// Millisecond-precision UTC timestamp.
///
/// Serialized as an integer; deserialization additionally accepts RFC 3339
/// strings since the REST backend emits those for `createdAt`/`readAt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Absolute difference between two timestamps in milliseconds.
    #[must_use]
    pub const fn abs_diff(&self, other: Self) -> u64 {
        self.0.abs_diff(other.0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Rfc3339(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Self(ms)),
            Raw::Rfc3339(s) => {
                let parsed = chrono::DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| serde::de::Error::custom(format!("bad timestamp {s:?}: {e}")))?;
                let millis = u64::try_from(parsed.timestamp_millis())
                    .map_err(|_| serde::de::Error::custom("timestamp before epoch"))?;
                Ok(Self(millis))
            }
        }
    }
}

/// A profile snapshot of one side of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// The participant's user identifier.
    #[serde(alias = "_id")]
    pub id: UserId,
    /// Display name at the time the snapshot was taken.
    #[serde(default)]
    pub full_name: String,
}

impl Participant {
    /// Creates a participant snapshot.
    pub fn new(id: UserId, full_name: impl Into<String>) -> Self {
        Self {
            id,
            full_name: full_name.into(),
        }
    }

    /// Creates a placeholder snapshot when only the identifier is known
    /// (e.g. the receiver side of an outbound message).
    pub fn bare(id: UserId) -> Self {
        let full_name = id.as_str().to_string();
        Self { id, full_name }
    }
}

/// Metadata for a file attached to a message.
///
/// Upload mechanics are outside the engine; only the metadata rides on
/// the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Original file name.
    pub filename: String,
    /// Download URL assigned by the server.
    pub url: String,
    /// MIME type or extension hint.
    pub file_type: String,
    /// File size in bytes.
    pub size: u64,
}

/// A single message in a two-sided conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned identifier (provisional for optimistic echoes).
    #[serde(alias = "_id")]
    pub id: MessageId,
    /// Text content; may be empty when attachments are present.
    #[serde(default)]
    pub content: String,
    /// Who sent the message.
    pub sender: Participant,
    /// A specific user identifier, or the `"admin"` pseudo-identity.
    pub receiver: UserId,
    /// Attached file metadata.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Whether the receiving side has read the message.
    #[serde(default)]
    pub read: bool,
    /// When the message was created (server clock).
    pub created_at: Timestamp,
    /// When the message was read, if it has been.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<Timestamp>,
}

/// Error returned when an outbound message fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty and no attachments are present.
    #[error("message has no content and no attachments")]
    Empty,
    /// Content exceeds the maximum allowed length.
    #[error("message too long ({len} characters, max {max})")]
    TooLong {
        /// Actual content length in characters.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

impl Message {
    /// Validates this message for sending.
    ///
    /// A message must carry either non-blank text content or at least one
    /// attachment, and content must stay within [`MAX_CONTENT_LEN`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] or [`ValidationError::TooLong`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.content.trim().is_empty() && self.attachments.is_empty() {
            return Err(ValidationError::Empty);
        }
        let len = self.content.chars().count();
        if len > MAX_CONTENT_LEN {
            return Err(ValidationError::TooLong {
                len,
                max: MAX_CONTENT_LEN,
            });
        }
        Ok(())
    }

    /// Whether the local actor sent this message.
    #[must_use]
    pub fn is_outbound(&self, local: &LocalIdentity) -> bool {
        self.sender.id == local.user_id
    }

    /// Whether this message is directed at the local actor.
    ///
    /// For admins, a receiver of `"admin"` counts as inbound; everyone
    /// else matches on their own user id.
    #[must_use]
    pub fn is_inbound_to(&self, local: &LocalIdentity) -> bool {
        if self.is_outbound(local) {
            return false;
        }
        self.receiver == local.user_id || (local.admin && self.receiver.is_admin())
    }

    /// The conversation this message belongs to, from the local actor's
    /// perspective.
    ///
    /// Admins key conversations by the end user on the other side; end
    /// users always key by the admin pseudo-identity (single-thread mode).
    #[must_use]
    pub fn conversation_key(&self, local: &LocalIdentity) -> UserId {
        if !local.admin {
            return UserId::admin();
        }
        if self.is_outbound(local) {
            self.receiver.clone()
        } else {
            self.sender.id.clone()
        }
    }

    /// The counterpart's profile snapshot, if this message carries one.
    ///
    /// Only the sender side carries a full snapshot; for outbound messages
    /// a bare placeholder is synthesized from the receiver id.
    #[must_use]
    pub fn counterpart_profile(&self, local: &LocalIdentity) -> Participant {
        if self.is_outbound(local) {
            Participant::bare(self.receiver.clone())
        } else {
            self.sender.clone()
        }
    }
}
