//! Huddle — real-time synchronization core for a team chat client.
//!
//! The UI/CRUD layer lives elsewhere; this crate owns the parts with
//! genuine concurrency and failure-recovery concerns: the persistent
//! event channel, optimistic message reconciliation, presence and
//! typing tracking, the group call coordinator, and the local media
//! device lifecycle.

pub mod call;
pub mod channel;
pub mod chat;
pub mod client;
pub mod config;
pub mod media;
pub mod presence;
pub mod session;
pub mod typing;
