//! Application state shared across handlers.

use std::sync::Arc;

use crate::actions::ActionHandler;
use crate::hub::EventHub;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event hub owning the per-session buffers and connection sets.
    pub hub: Arc<EventHub>,
    /// Domain-action handler (optional; the action ingress returns 503
    /// when none is configured).
    pub actions: Option<Arc<dyn ActionHandler>>,
    /// Origins allowed by the CORS layer.
    pub cors_origins: Vec<String>,
}

impl AppState {
    /// Create new application state around a hub.
    pub fn new(hub: EventHub) -> Self {
        Self {
            hub: Arc::new(hub),
            actions: None,
            cors_origins: Vec::new(),
        }
    }

    /// Set the domain-action handler.
    pub fn with_action_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.actions = Some(handler);
        self
    }

    /// Set the allowed CORS origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}
