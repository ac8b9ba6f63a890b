//! Canonical protocol types for rlay session event streams.
//!
//! These types define the wire contract between event producers (action
//! handlers, trusted services posting to the dispatch endpoint) and event
//! consumers (SSE clients). The relay itself never interprets event
//! payloads; it only routes, buffers, and replays them.

mod actions;
mod events;

pub use actions::{ActionOutcome, ActionRequest};
pub use events::{
    ConnectedFrame, DispatchRequest, DomainEvent, ReconnectedFrame, ResumeToken,
};
