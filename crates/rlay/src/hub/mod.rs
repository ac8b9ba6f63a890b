//! Event hub: per-session event buffering and live fan-out.
//!
//! ## Data flow
//!
//! ```text
//! action handler ──events──▶ dispatch ──▶ EventLog (append, bounded)
//!                                    └──▶ ConnectionRegistry (ordered push
//!                                         to each watcher, prune on failure)
//!
//! client connect ──▶ register ──▶ replay from EventLog ──▶ live stream
//! ```
//!
//! The hub is injected state (owned by `AppState`), not a module singleton:
//! registries are keyed by session id over sharded maps, so unrelated
//! sessions never contend and the whole component can be constructed
//! per-test. Consistency is process-local; a multi-process deployment needs
//! a shared store behind this same seam.

mod buffer;
mod registry;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rlay_protocol::DomainEvent;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

pub use buffer::EventLog;
pub use registry::ConnectionRegistry;

/// Tunables for the hub. The defaults are the protocol constants; the config
/// file can override them.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Most recent events retained per session.
    pub events_per_session: usize,
    /// Per-connection send buffer; overflowing it counts as a failed write.
    pub connection_buffer: usize,
    /// Heartbeat interval for idle streams.
    pub heartbeat: Duration,
    /// Idle time after which a session's buffer and connections are swept.
    pub session_ttl: Duration,
    /// Minimum spacing between opportunistic sweeps.
    pub sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            events_per_session: 100,
            connection_buffer: 64,
            heartbeat: Duration::from_secs(30),
            session_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// A freshly registered client stream.
pub struct StreamConnection {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<DomainEvent>,
}

/// Point-in-time counters for one session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub buffered_events: usize,
    pub latest_seq: u64,
    pub connections: usize,
}

/// Owns the event log and the connection registry for every session.
pub struct EventHub {
    log: EventLog,
    registry: ConnectionRegistry,
    config: HubConfig,
    last_sweep: Mutex<Instant>,
}

impl EventHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            log: EventLog::new(config.events_per_session),
            registry: ConnectionRegistry::new(config.connection_buffer),
            last_sweep: Mutex::new(Instant::now()),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a watcher for a session.
    pub fn connect(&self, session_id: &str) -> StreamConnection {
        self.maybe_sweep();
        let (id, receiver) = self.registry.register(session_id);
        info!(session_id, conn_id = %id, "client connected");
        StreamConnection { id, receiver }
    }

    /// Deregister a watcher. Called when its stream is dropped, whether the
    /// remote hung up or a write failed; either way it is ordinary lifecycle,
    /// not an error.
    pub fn disconnect(&self, session_id: &str, conn_id: Uuid) {
        self.registry.remove(session_id, conn_id);
        info!(session_id, conn_id = %conn_id, "client disconnected");
    }

    /// Append events to the session's log, then push them live to every
    /// registered connection in the same order.
    ///
    /// Buffering is unconditional so a watcher that is briefly absent (or
    /// does not exist yet) can catch up later via replay. Delivery is
    /// best-effort: a connection whose write fails is pruned and delivery to
    /// the others continues undisturbed.
    pub fn dispatch(&self, session_id: &str, events: Vec<DomainEvent>) {
        if events.is_empty() {
            return;
        }
        self.maybe_sweep();

        self.log.append(session_id, &events);
        let recipients = self.registry.fan_out(session_id, &events);
        debug!(
            session_id,
            events = events.len(),
            recipients,
            "dispatched events"
        );
    }

    /// Retained events with `seq > after_seq`, oldest first.
    pub fn since(&self, session_id: &str, after_seq: u64) -> Vec<DomainEvent> {
        self.log.since(session_id, after_seq)
    }

    pub fn stats(&self, session_id: &str) -> SessionStats {
        SessionStats {
            session_id: session_id.to_string(),
            buffered_events: self.log.len(session_id),
            latest_seq: self.log.latest_seq(session_id),
            connections: self.registry.count(session_id),
        }
    }

    /// Evict buffers and connection sets for sessions idle past the TTL.
    ///
    /// Pure cleanup: a swept session can reappear on the next dispatch or
    /// connect, just without replay history.
    pub fn sweep(&self, now: Instant) {
        let expired = self.log.expired_sessions(now, self.config.session_ttl);
        for session_id in expired {
            self.log.remove(&session_id);
            self.registry.remove_session(&session_id);
            info!(session_id = %session_id, "swept inactive session");
        }
    }

    /// Run `sweep` if enough time has passed since the last one.
    ///
    /// Invoked from the connect and dispatch entry points rather than a
    /// background timer, so cleanup needs no guaranteed persistent execution
    /// context. `try_lock` keeps the hot path from ever waiting on a sweep
    /// already in flight.
    fn maybe_sweep(&self) {
        let now = Instant::now();
        let due = match self.last_sweep.try_lock() {
            Ok(mut last) => {
                if now.duration_since(*last) >= self.config.sweep_interval {
                    *last = now;
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        };
        if due {
            self.sweep(now);
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
