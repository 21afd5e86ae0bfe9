//! `ConvoSync` — client-side synchronization engine for a two-sided
//! messaging feature.
//!
//! The engine reconciles two unsynchronized inputs into consistent local
//! state: paginated REST history fetches and an unordered, at-most-once
//! live event stream. [`client::MessagingClient`] is the façade; the
//! layers underneath are the connection supervisor ([`connection`]), the
//! in-memory stores ([`store`]), and the event reconciler ([`sync`]).

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod store;
pub mod sync;
