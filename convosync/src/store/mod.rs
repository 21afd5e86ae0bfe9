//! In-memory state containers for messages and conversation summaries.
//!
//! The stores are plain synchronous containers; concurrency and event
//! ordering are the reconciler's concern. Both stores treat the
//! server-assigned message id as the sole deduplication key and never
//! drop or reorder data on their own.

mod conversation_store;
mod message_store;

pub use conversation_store::ConversationStore;
pub use message_store::{Insert, MessageStore};
