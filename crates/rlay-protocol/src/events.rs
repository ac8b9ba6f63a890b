//! Domain event envelope and stream control frames.
//!
//! Events flow from producers through the relay to every client watching the
//! event's session. Within a session, `seq` is strictly increasing and
//! gapless as produced; the relay preserves that order end to end. `id` is
//! globally unique and doubles as the wire-level resumption token (combined
//! with the session id).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single application-level fact produced by some action against a session.
///
/// Owned by the relay's event log once dispatched; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// Globally unique event id, used in the SSE `id:` field.
    pub id: String,

    /// Session-scoped monotonic sequence number (starts at 1).
    pub seq: u64,

    /// Event name as emitted on the wire (`event:` field of the SSE frame).
    #[serde(rename = "type")]
    pub event_type: String,

    /// The session this event belongs to.
    pub session_id: String,

    /// Opaque application payload. The relay never looks inside.
    pub payload: Value,

    /// Producer-side creation time.
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    /// Build an event with a fresh uuid and the current timestamp.
    pub fn new(
        session_id: impl Into<String>,
        seq: u64,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            seq,
            event_type: event_type.into(),
            session_id: session_id.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// The resumption token a client should persist after seeing this event.
    pub fn resume_token(&self) -> String {
        format!("{}:{}", self.session_id, self.seq)
    }
}

/// Parsed client resumption token of the form `"<sessionId>:<seq>"`.
///
/// Clients send this on reconnect (query parameter or the standard
/// `Last-Event-ID` header) to request replay of everything after `seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeToken {
    pub session_id: String,
    pub seq: u64,
}

impl ResumeToken {
    /// Parse a raw token. Returns `None` for anything malformed; callers
    /// treat that as seq 0 (no replay, go live).
    ///
    /// Session ids may contain `:`, so the seq is taken from the last colon.
    pub fn parse(raw: &str) -> Option<Self> {
        let (session_id, seq) = raw.rsplit_once(':')?;
        if session_id.is_empty() {
            return None;
        }
        let seq = seq.parse::<u64>().ok()?;
        Some(Self {
            session_id: session_id.to_string(),
            seq,
        })
    }

    /// The resume seq this token grants for `session_id`.
    ///
    /// `None` means no replay was requested: the token is malformed or was
    /// minted for a different session. `Some(0)` is a valid request to
    /// replay everything retained.
    pub fn resolve(raw: &str, session_id: &str) -> Option<u64> {
        match Self::parse(raw) {
            Some(token) if token.session_id == session_id => Some(token.seq),
            _ => None,
        }
    }
}

/// Ingress payload for the dispatch endpoint: append these events to the
/// session's log and push them to every live watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub session_id: String,
    pub events: Vec<DomainEvent>,
}

/// Payload of the `connected` frame sent first on every stream.
///
/// `last_seq` is the client's own resume baseline (0 for fresh connects) so
/// it can persist a checkpoint before any domain event arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedFrame {
    pub session_id: String,
    pub last_seq: u64,
}

/// Payload of the `reconnected` frame summarizing a catch-up window.
///
/// Only sent when at least one event was replayed. `from_seq` is the seq the
/// client supplied; `to_seq` is the seq of the last replayed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectedFrame {
    pub missed_count: usize,
    pub from_seq: u64,
    pub to_seq: u64,
}
