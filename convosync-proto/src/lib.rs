//! Shared data model and wire codec for the `ConvoSync` engine.

pub mod codec;
pub mod conversation;
pub mod event;
pub mod message;
