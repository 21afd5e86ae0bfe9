//! Live-channel vocabulary: the events the server pushes, the actions a
//! client emits, and the connection lifecycle states.
//!
//! The vocabulary is closed: both directions are enums, so a client can
//! neither emit nor dispatch on an event name the protocol does not
//! define. Unknown names coming off the wire surface as a codec error
//! instead of silently spawning new event kinds.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId, UserId};

/// An event pushed by the server over the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// A new message was created, in any conversation visible to this
    /// client.
    NewMessage(Message),
    /// The counterpart read a message we sent.
    MessageRead {
        /// The message that was read.
        message_id: MessageId,
    },
    /// A counterpart started or stopped typing.
    UserTyping {
        /// Who is typing.
        user_id: UserId,
        /// `true` on start, `false` on stop.
        is_typing: bool,
    },
    /// Liveness reply to a [`ClientAction::Ping`].
    Pong,
}

impl ServerEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new-message",
            Self::MessageRead { .. } => "message-read",
            Self::UserTyping { .. } => "user-typing",
            Self::Pong => "pong",
        }
    }
}

/// An action a client emits over the live channel.
///
/// Actions are fire-and-forget: they are dropped, not queued, when the
/// channel is not connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientAction {
    /// Subscribe to live events for one conversation.
    Join {
        /// The counterpart keying the conversation.
        conversation_id: UserId,
    },
    /// Unsubscribe from a conversation.
    Leave {
        /// The counterpart keying the conversation.
        conversation_id: UserId,
    },
    /// Broadcast a typing indicator to the conversation.
    Typing {
        /// The counterpart keying the conversation.
        conversation_id: UserId,
        /// `true` on start, `false` on stop.
        is_typing: bool,
    },
    /// Liveness probe.
    Ping,
}

impl ClientAction {
    /// Wire name of this action.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join-conversation",
            Self::Leave { .. } => "leave-conversation",
            Self::Typing { .. } => "typing",
            Self::Ping => "ping",
        }
    }
}

/// Lifecycle state of the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// Initial connection attempt in progress.
    Connecting,
    /// Channel is open and events are flowing.
    Connected,
    /// Connection lost; a reconnect attempt is scheduled or in progress.
    Reconnecting {
        /// 1-based number of the upcoming attempt.
        attempt: u32,
    },
    /// All reconnect attempts exhausted; callers should degrade to
    /// polling.
    ReconnectFailed,
    /// Startup failed before any connection was established.
    Error,
}

impl ConnectionStatus {
    /// Whether live actions would currently reach the server.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::ReconnectFailed => f.write_str("reconnect failed"),
            Self::Error => f.write_str("error"),
        }
    }
}
