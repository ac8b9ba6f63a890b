//! API request handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
};
use rlay_protocol::{
    ActionOutcome, ActionRequest, ConnectedFrame, DispatchRequest, DomainEvent, ReconnectedFrame,
    ResumeToken,
};
use serde::{Deserialize, Serialize};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::actions::target_session;
use crate::hub::{EventHub, SessionStats};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Connect parameters for the event stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    /// Session to watch. Required.
    pub session_id: Option<String>,
    /// Resumption token `"<sessionId>:<seq>"`. Anything malformed means
    /// "replay nothing, just go live".
    pub last_event_id: Option<String>,
}

/// Deregisters the connection when its stream is dropped. Whether the
/// remote hung up or a write failed, teardown runs exactly once.
struct StreamGuard {
    hub: Arc<EventHub>,
    session_id: String,
    conn_id: Uuid,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.hub.disconnect(&self.session_id, self.conn_id);
    }
}

/// Session event stream.
///
/// GET /api/events?sessionId=...&lastEventId=...
///
/// Emits a `connected` frame, replays missed events when a resumption token
/// is supplied (followed by a `reconnected` summary), then forwards live
/// events until the client goes away. Heartbeat comments keep intermediary
/// infrastructure from tearing down idle connections.
#[instrument(skip(state, headers))]
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let session_id = query
        .session_id
        .filter(|sid| !sid.is_empty())
        .ok_or_else(|| ApiError::bad_request("sessionId query parameter is required"))?;

    // EventSource reconnects carry the token in the standard header; an
    // explicit query parameter wins.
    let raw_token = query.last_event_id.or_else(|| {
        headers
            .get("last-event-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    });
    let resume_seq = raw_token
        .as_deref()
        .and_then(|raw| ResumeToken::resolve(raw, &session_id));
    let last_seq = resume_seq.unwrap_or(0);

    let conn = state.hub.connect(&session_id);

    let mut intro: Vec<Event> = vec![control_frame(
        "connected",
        &ConnectedFrame {
            session_id: session_id.clone(),
            last_seq,
        },
    )];

    // Everything at or below the floor has already reached this client,
    // either before it disconnected or through the replay below. Live
    // deliveries racing the replay snapshot are filtered against it.
    let mut replay_floor = last_seq;
    if resume_seq.is_some() {
        let missed = state.hub.since(&session_id, last_seq);
        if !missed.is_empty() {
            let to_seq = missed.last().map(|event| event.seq).unwrap_or(last_seq);
            info!(
                session_id = %session_id,
                missed = missed.len(),
                from_seq = last_seq,
                to_seq,
                "replaying missed events"
            );
            intro.extend(missed.iter().map(event_frame));
            intro.push(control_frame(
                "reconnected",
                &ReconnectedFrame {
                    missed_count: missed.len(),
                    from_seq: last_seq,
                    to_seq,
                },
            ));
            replay_floor = to_seq;
        }
    }

    let guard = StreamGuard {
        hub: state.hub.clone(),
        session_id,
        conn_id: conn.id,
    };
    let live = ReceiverStream::new(conn.receiver).filter_map(move |event| {
        let _open = &guard;
        if event.seq <= replay_floor {
            debug!(seq = event.seq, "skipping event already replayed");
            None
        } else {
            Some(Ok(event_frame(&event)))
        }
    });

    let stream = tokio_stream::iter(intro.into_iter().map(Ok::<Event, Infallible>)).chain(live);

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.hub.config().heartbeat)))
}

/// Response for the dispatch endpoint.
#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub accepted: usize,
}

/// Event ingress: append to the session's log and push to live watchers.
///
/// POST /api/dispatch
///
/// Success means the append succeeded (it always does); delivery failures
/// are handled by pruning the affected connection and never surface here.
#[instrument(skip_all, fields(session_id = %request.session_id))]
pub async fn dispatch_events(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> ApiResult<(StatusCode, Json<DispatchResponse>)> {
    let accepted = request.events.len();
    state.hub.dispatch(&request.session_id, request.events);
    Ok((StatusCode::ACCEPTED, Json(DispatchResponse { accepted })))
}

/// Action ingress: forward to the domain-action handler, dispatch whatever
/// events it produced, and return its outcome verbatim.
///
/// POST /api/actions
#[instrument(skip_all, fields(tool = %request.tool))]
pub async fn invoke_action(
    State(state): State<AppState>,
    Json(request): Json<ActionRequest>,
) -> ApiResult<Json<ActionOutcome>> {
    let handler = state
        .actions
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("no action handler configured"))?;

    let outcome = handler
        .invoke(&request.tool, &request.arguments)
        .await
        .map_err(|err| ApiError::bad_gateway(format!("action handler failed: {err}")))?;

    if let Some(events) = outcome.events.as_ref().filter(|events| !events.is_empty()) {
        match target_session(&request.arguments, events) {
            Some(session_id) => {
                state.hub.dispatch(&session_id, events.clone());
            }
            None => {
                warn!(tool = %request.tool, "action produced events but no session could be resolved");
            }
        }
    }

    Ok(Json(outcome))
}

/// Point-in-time counters for one session.
///
/// GET /api/sessions/{session_id}/stats
///
/// Sessions exist implicitly, so an unknown id reports zeros.
#[instrument(skip(state))]
pub async fn session_stats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionStats>> {
    Ok(Json(state.hub.stats(&session_id)))
}

fn control_frame<T: Serialize>(name: &'static str, payload: &T) -> Event {
    match serde_json::to_string(payload) {
        Ok(data) => Event::default().event(name).data(data),
        Err(err) => {
            warn!(frame = name, error = %err, "failed to serialize control frame");
            Event::default().event(name).data("{}")
        }
    }
}

fn event_frame(event: &DomainEvent) -> Event {
    let frame = Event::default().event(&event.event_type).id(&event.id);
    match serde_json::to_string(event) {
        Ok(data) => frame.data(data),
        Err(err) => {
            warn!(event_id = %event.id, error = %err, "failed to serialize domain event");
            frame.data("{}")
        }
    }
}
