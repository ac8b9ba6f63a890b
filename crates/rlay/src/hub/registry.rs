//! Connection registry: the set of open client streams per session.

use dashmap::DashMap;
use rlay_protocol::DomainEvent;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Sender half of one client's stream.
///
/// Writes go through a bounded channel drained by the connection's SSE
/// response task, which keeps per-connection writes single-writer. A failed
/// send (closed or full channel) is proof of death: the connection is
/// removed and never retried.
pub struct ConnectionHandle {
    pub id: Uuid,
    sender: mpsc::Sender<DomainEvent>,
}

/// Per-session connection sets. Deliberately minimal: a map, two mutators,
/// and the ordered fan-out the dispatch path needs.
pub struct ConnectionRegistry {
    connections: DashMap<String, Vec<ConnectionHandle>>,
    buffer_size: usize,
}

impl ConnectionRegistry {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            connections: DashMap::new(),
            buffer_size,
        }
    }

    /// Register a new connection for a session.
    ///
    /// Returns the connection id and the receiver its stream task drains.
    pub fn register(&self, session_id: &str) -> (Uuid, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let id = Uuid::new_v4();
        self.connections
            .entry(session_id.to_string())
            .or_default()
            .push(ConnectionHandle { id, sender: tx });
        debug!(session_id, conn_id = %id, "registered connection");
        (id, rx)
    }

    /// Remove one connection; the session's set entry is dropped when empty.
    /// The event buffer is untouched so a later reconnect can still replay.
    pub fn remove(&self, session_id: &str, conn_id: Uuid) {
        if let Some(mut conns) = self.connections.get_mut(session_id) {
            conns.retain(|conn| conn.id != conn_id);
        }
        self.connections.remove_if(session_id, |_, conns| conns.is_empty());
        debug!(session_id, conn_id = %conn_id, "removed connection");
    }

    /// Push `events` in order to every connection of the session.
    ///
    /// The first failed write to a connection stops further writes to it for
    /// this call and removes it. No retries, no blocking, and no effect on
    /// the other connections. Returns the number of live recipients.
    pub fn fan_out(&self, session_id: &str, events: &[DomainEvent]) -> usize {
        let mut recipients = 0;
        if let Some(mut conns) = self.connections.get_mut(session_id) {
            conns.retain(|conn| {
                for event in events {
                    if let Err(err) = conn.sender.try_send(event.clone()) {
                        debug!(
                            session_id,
                            conn_id = %conn.id,
                            error = %err,
                            "write failed, pruning connection"
                        );
                        return false;
                    }
                }
                recipients += 1;
                true
            });
        }
        self.connections.remove_if(session_id, |_, conns| conns.is_empty());
        recipients
    }

    /// Number of live connections for a session.
    pub fn count(&self, session_id: &str) -> usize {
        self.connections
            .get(session_id)
            .map(|conns| conns.len())
            .unwrap_or(0)
    }

    /// Drop a session's whole connection set (retention sweep).
    pub fn remove_session(&self, session_id: &str) {
        self.connections.remove(session_id);
    }
}
