//! HTTP API module.
//!
//! Provides the event stream endpoint, the dispatch and action ingress
//! endpoints, and session observability.

mod error;
mod handlers;
mod routes;
mod state;

// Re-export error types for external use
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
