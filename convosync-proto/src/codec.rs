//! JSON text-frame codec for the live channel.
//!
//! Frames are tagged envelopes of the form `{"event": <name>, "data":
//! <payload>}`. Decoding is total over the closed vocabulary in
//! [`crate::event`]: a recognized tag with a malformed payload and an
//! unrecognized tag are distinct, recoverable errors, so one bad frame
//! never tears down the connection.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::event::{ClientAction, ServerEvent};
use crate::message::{Message, MessageId, UserId};

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON or a recognized payload is malformed.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The frame carries an event name outside the protocol vocabulary.
    #[error("unknown event: {0:?}")]
    UnknownEvent(String),
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct ReadPayload {
    #[serde(alias = "messageId", alias = "_id")]
    message_id: MessageId,
}

#[derive(Deserialize)]
struct TypingPayload {
    #[serde(alias = "userId")]
    user_id: UserId,
    #[serde(alias = "isTyping")]
    is_typing: bool,
}

/// Decodes one text frame into a [`ServerEvent`].
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for invalid JSON or bad payloads and
/// [`CodecError::UnknownEvent`] for names outside the vocabulary.
pub fn decode_event(frame: &str) -> Result<ServerEvent, CodecError> {
    let raw: RawFrame =
        serde_json::from_str(frame).map_err(|e| CodecError::Malformed(e.to_string()))?;
    match raw.event.as_str() {
        "new-message" => {
            let message: Message = serde_json::from_value(raw.data)
                .map_err(|e| CodecError::Malformed(format!("new-message payload: {e}")))?;
            Ok(ServerEvent::NewMessage(message))
        }
        "message-read" => {
            let payload: ReadPayload = serde_json::from_value(raw.data)
                .map_err(|e| CodecError::Malformed(format!("message-read payload: {e}")))?;
            Ok(ServerEvent::MessageRead {
                message_id: payload.message_id,
            })
        }
        "user-typing" => {
            let payload: TypingPayload = serde_json::from_value(raw.data)
                .map_err(|e| CodecError::Malformed(format!("user-typing payload: {e}")))?;
            Ok(ServerEvent::UserTyping {
                user_id: payload.user_id,
                is_typing: payload.is_typing,
            })
        }
        "pong" => Ok(ServerEvent::Pong),
        other => Err(CodecError::UnknownEvent(other.to_string())),
    }
}

/// Encodes a [`ClientAction`] into a text frame.
#[must_use]
pub fn encode_action(action: &ClientAction) -> String {
    let data = match action {
        ClientAction::Join { conversation_id } | ClientAction::Leave { conversation_id } => {
            json!({ "conversationId": conversation_id })
        }
        ClientAction::Typing {
            conversation_id,
            is_typing,
        } => json!({ "conversationId": conversation_id, "isTyping": is_typing }),
        ClientAction::Ping => Value::Null,
    };
    json!({ "event": action.name(), "data": data }).to_string()
}
