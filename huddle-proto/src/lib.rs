//! Wire protocol library for Huddle.
//!
//! Defines the identifiers, message bodies, and channel events exchanged
//! between a Huddle client and the server, plus the postcard codec used
//! to frame them on the WebSocket channel.

pub mod call;
pub mod codec;
pub mod event;
pub mod ids;
pub mod message;
