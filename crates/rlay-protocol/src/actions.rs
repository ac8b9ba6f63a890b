//! Domain-action handler interface types.
//!
//! An action handler is an external collaborator that, given a tool name and
//! arguments, performs some mutation against a session and reports the
//! resulting domain events. The relay only reads the `events` field and the
//! session id needed to route them; everything else passes through opaque.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DomainEvent;

/// An action invocation forwarded to the configured handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Tool name understood by the handler.
    pub tool: String,

    /// Opaque tool arguments. By convention a `sessionId` key routes the
    /// resulting events; absent that, the first event's session is used.
    #[serde(default)]
    pub arguments: Value,
}

/// The handler's result, passed back to the action caller verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Ordered domain events produced by the action, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<DomainEvent>>,
}
