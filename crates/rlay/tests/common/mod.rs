//! Shared helpers for API integration tests.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::time::timeout;

use rlay::actions::ActionHandler;
use rlay::api::{AppState, create_router};
use rlay::hub::{EventHub, HubConfig};
use rlay_protocol::ActionOutcome;

/// Hub tuned for tests: production defaults except a fast heartbeat so
/// keepalive behavior is observable without waiting 30 seconds.
pub fn test_hub_config() -> HubConfig {
    HubConfig {
        heartbeat: Duration::from_millis(200),
        ..HubConfig::default()
    }
}

pub fn test_state() -> AppState {
    AppState::new(EventHub::new(test_hub_config()))
}

pub fn test_app(state: AppState) -> Router {
    create_router(state)
}

/// Action handler returning a canned outcome.
pub struct ScriptedActionHandler {
    pub outcome: ActionOutcome,
}

#[async_trait]
impl ActionHandler for ScriptedActionHandler {
    async fn invoke(&self, _tool: &str, _arguments: &Value) -> Result<ActionOutcome> {
        Ok(self.outcome.clone())
    }
}

/// Incremental reader for SSE response bodies.
pub struct SseReader {
    body: Body,
    buffer: String,
}

impl SseReader {
    pub fn new(body: Body) -> Self {
        Self {
            body,
            buffer: String::new(),
        }
    }

    /// Next complete frame without its blank-line terminator, or `None` when
    /// the stream ends or five seconds pass without one.
    pub async fn next_frame(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buffer.find("\n\n") {
                let frame = self.buffer[..pos].to_string();
                self.buffer.drain(..pos + 2);
                return Some(frame);
            }
            let chunk = timeout(Duration::from_secs(5), self.body.frame())
                .await
                .ok()??
                .ok()?;
            if let Ok(data) = chunk.into_data() {
                self.buffer
                    .push_str(std::str::from_utf8(&data).expect("SSE body is utf8"));
            }
        }
    }
}

/// Value of a frame field like `event:` or `id:`.
pub fn frame_field<'a>(frame: &'a str, field: &str) -> Option<&'a str> {
    frame.lines().find_map(|line| {
        line.strip_prefix(field)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::trim_start)
    })
}

/// Parsed JSON payload of a frame's `data:` field.
pub fn frame_data(frame: &str) -> Value {
    let raw = frame_field(frame, "data").expect("frame has a data field");
    serde_json::from_str(raw).expect("frame data is JSON")
}
