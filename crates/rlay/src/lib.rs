//! Session event relay library.
//!
//! Buffers per-session domain events, fans them out to watching SSE clients,
//! and replays missed events to reconnecting clients.

pub mod actions;
pub mod api;
pub mod hub;
