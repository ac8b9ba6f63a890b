//! Domain-action handler boundary.
//!
//! The relay never runs domain logic itself. Action requests are forwarded
//! to a handler behind the [`ActionHandler`] trait; the relay only reads the
//! outcome's `events` and the session id needed to route them. The
//! production implementation is an HTTP client talking to a configured
//! upstream; tests inject scripted implementations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rlay_protocol::{ActionOutcome, DomainEvent};
use serde_json::Value;
use std::time::Duration;

/// Performs a named action and reports the resulting domain events.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(&self, tool: &str, arguments: &Value) -> Result<ActionOutcome>;
}

/// Resolve the session the outcome's events should be dispatched to: the
/// `sessionId` argument when present, otherwise the first event's session.
pub fn target_session(arguments: &Value, events: &[DomainEvent]) -> Option<String> {
    arguments
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| events.first().map(|event| event.session_id.clone()))
}

/// HTTP action handler: POSTs `{tool, arguments}` to the configured upstream
/// and expects an [`ActionOutcome`] body back.
pub struct HttpActionHandler {
    client: reqwest::Client,
    upstream_url: String,
}

impl HttpActionHandler {
    pub fn new(upstream_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building action handler HTTP client")?;
        Ok(Self {
            client,
            upstream_url: upstream_url.into(),
        })
    }
}

#[async_trait]
impl ActionHandler for HttpActionHandler {
    async fn invoke(&self, tool: &str, arguments: &Value) -> Result<ActionOutcome> {
        let response = self
            .client
            .post(&self.upstream_url)
            .json(&serde_json::json!({ "tool": tool, "arguments": arguments }))
            .send()
            .await
            .with_context(|| format!("calling action handler at {}", self.upstream_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("action handler returned {}: {}", status, body);
        }

        response
            .json::<ActionOutcome>()
            .await
            .context("decoding action handler response")
    }
}
