//! Development hub for Huddle clients.
//!
//! A small in-process server speaking the Huddle channel protocol:
//! authenticated WebSocket sessions, group membership, message id
//! assignment and echo, typing and presence fan-out. Used for local
//! development and as the backend of the client integration tests; it
//! is not a production server.

pub mod hub;
