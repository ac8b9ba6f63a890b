//! Per-session event log: append-only, sequence-ordered, capacity-bounded.

use std::collections::VecDeque;
use std::time::Instant;

use dashmap::DashMap;
use rlay_protocol::DomainEvent;
use tracing::debug;

/// One session's retained events plus its activity clock.
#[derive(Debug)]
struct SessionBuffer {
    events: VecDeque<DomainEvent>,
    last_activity: Instant,
}

impl SessionBuffer {
    fn new(now: Instant) -> Self {
        Self {
            events: VecDeque::new(),
            last_activity: now,
        }
    }
}

/// The event log: one bounded buffer per session, created lazily on first
/// append and evicted by the retention sweeper.
///
/// Append is the only mutation and cannot fail. Once the buffer is over
/// capacity the oldest events are dropped first, so replay only serves what
/// is still resident; anything evicted is gone for good (best-effort
/// catch-up, by contract).
pub struct EventLog {
    buffers: DashMap<String, SessionBuffer>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity,
        }
    }

    /// Append events in order, creating the session's buffer if absent, and
    /// bump its activity clock. Trims from the front when over capacity.
    pub fn append(&self, session_id: &str, events: &[DomainEvent]) {
        let now = Instant::now();
        let mut buffer = self
            .buffers
            .entry(session_id.to_string())
            .or_insert_with(|| SessionBuffer::new(now));

        buffer.events.extend(events.iter().cloned());
        buffer.last_activity = now;

        let overflow = buffer.events.len().saturating_sub(self.capacity);
        if overflow > 0 {
            buffer.events.drain(..overflow);
            debug!(session_id, dropped = overflow, "event buffer over capacity");
        }
    }

    /// All retained events with `seq > after_seq`, oldest first.
    ///
    /// Empty when the session is unknown or nothing qualifies. When
    /// `after_seq` predates the retention window the result simply starts at
    /// the oldest retained event; the gap is silent.
    pub fn since(&self, session_id: &str, after_seq: u64) -> Vec<DomainEvent> {
        match self.buffers.get(session_id) {
            Some(buffer) => buffer
                .events
                .iter()
                .filter(|event| event.seq > after_seq)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of retained events for a session.
    pub fn len(&self, session_id: &str) -> usize {
        self.buffers
            .get(session_id)
            .map(|buffer| buffer.events.len())
            .unwrap_or(0)
    }

    /// Seq of the newest retained event, 0 when none.
    pub fn latest_seq(&self, session_id: &str) -> u64 {
        self.buffers
            .get(session_id)
            .and_then(|buffer| buffer.events.back().map(|event| event.seq))
            .unwrap_or(0)
    }

    /// Sessions whose last activity is older than `ttl` as of `now`.
    pub fn expired_sessions(&self, now: Instant, ttl: std::time::Duration) -> Vec<String> {
        self.buffers
            .iter()
            .filter(|entry| {
                now.checked_duration_since(entry.value().last_activity)
                    .is_some_and(|idle| idle > ttl)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop a session's buffer entirely.
    pub fn remove(&self, session_id: &str) {
        self.buffers.remove(session_id);
    }

    /// Number of sessions currently holding a buffer.
    pub fn session_count(&self) -> usize {
        self.buffers.len()
    }
}
