//! API integration tests.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{
    ScriptedActionHandler, SseReader, frame_data, frame_field, test_app, test_state,
};
use rlay_protocol::{ActionOutcome, DomainEvent};

fn event_with_id(id: &str, session_id: &str, seq: u64, event_type: &str) -> DomainEvent {
    DomainEvent {
        id: id.to_string(),
        seq,
        event_type: event_type.to_string(),
        session_id: session_id.to_string(),
        payload: json!({"n": seq}),
        timestamp: chrono::Utc::now(),
    }
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap()
}

fn dispatch_request(session_id: &str, events: Vec<DomainEvent>) -> Request<Body> {
    Request::builder()
        .uri("/api/dispatch")
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_string(&json!({"sessionId": session_id, "events": events})).unwrap(),
        ))
        .unwrap()
}

/// Test that health endpoint works.
#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(test_state());

    let response = app
        .oneshot(get_request("/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Connecting without a session id is a client error and touches no state.
#[tokio::test]
async fn test_stream_requires_session_id() {
    let state = test_state();
    let app = test_app(state.clone());

    let response = app.oneshot(get_request("/api/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["code"], "BAD_REQUEST");

    assert_eq!(state.hub.stats("").connections, 0);
}

/// Fresh connects get a `connected` ack with their resume baseline.
#[tokio::test]
async fn test_connected_frame_on_fresh_connect() {
    let app = test_app(test_state());

    let response = app
        .oneshot(get_request("/api/events?sessionId=s1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let mut reader = SseReader::new(response.into_body());
    let connected = reader.next_frame().await.unwrap();

    assert_eq!(frame_field(&connected, "event"), Some("connected"));
    let data = frame_data(&connected);
    assert_eq!(data["sessionId"], "s1");
    assert_eq!(data["lastSeq"], 0);
}

/// Full client lifecycle: live delivery, disconnect, reconnect with replay.
#[tokio::test]
async fn test_end_to_end_replay_scenario() {
    let app = test_app(test_state());

    // Client A connects with no resume token.
    let response = app
        .clone()
        .oneshot(get_request("/api/events?sessionId=s1"))
        .await
        .unwrap();
    let mut client_a = SseReader::new(response.into_body());

    let connected = client_a.next_frame().await.unwrap();
    assert_eq!(frame_field(&connected, "event"), Some("connected"));
    assert_eq!(frame_data(&connected)["lastSeq"], 0);

    // An action produces one event while A is live.
    let response = app
        .clone()
        .oneshot(dispatch_request(
            "s1",
            vec![event_with_id("e1", "s1", 1, "move")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let live = client_a.next_frame().await.unwrap();
    assert_eq!(frame_field(&live, "event"), Some("move"));
    assert_eq!(frame_field(&live, "id"), Some("e1"));
    assert_eq!(frame_data(&live)["seq"], 1);

    // A disconnects.
    drop(client_a);

    // Client B reconnects from seq 0 and catches up.
    let response = app
        .clone()
        .oneshot(get_request("/api/events?sessionId=s1&lastEventId=s1:0"))
        .await
        .unwrap();
    let mut client_b = SseReader::new(response.into_body());

    let connected = client_b.next_frame().await.unwrap();
    assert_eq!(frame_field(&connected, "event"), Some("connected"));
    assert_eq!(frame_data(&connected)["lastSeq"], 0);

    let replayed = client_b.next_frame().await.unwrap();
    assert_eq!(frame_field(&replayed, "event"), Some("move"));
    assert_eq!(frame_field(&replayed, "id"), Some("e1"));

    let summary = client_b.next_frame().await.unwrap();
    assert_eq!(frame_field(&summary, "event"), Some("reconnected"));
    let data = frame_data(&summary);
    assert_eq!(data["missedCount"], 1);
    assert_eq!(data["fromSeq"], 0);
    assert_eq!(data["toSeq"], 1);
}

/// Reconnecting mid-history replays exactly the missed suffix.
#[tokio::test]
async fn test_replay_after_partial_history() {
    let app = test_app(test_state());

    let events: Vec<_> = (1..=5)
        .map(|seq| event_with_id(&format!("e{seq}"), "s1", seq, "move"))
        .collect();
    app.clone()
        .oneshot(dispatch_request("s1", events))
        .await
        .unwrap();

    let response = app
        .oneshot(get_request("/api/events?sessionId=s1&lastEventId=s1:3"))
        .await
        .unwrap();
    let mut reader = SseReader::new(response.into_body());

    let connected = reader.next_frame().await.unwrap();
    assert_eq!(frame_data(&connected)["lastSeq"], 3);

    for expected_seq in [4, 5] {
        let frame = reader.next_frame().await.unwrap();
        assert_eq!(frame_field(&frame, "event"), Some("move"));
        assert_eq!(frame_data(&frame)["seq"], expected_seq);
    }

    let summary = reader.next_frame().await.unwrap();
    assert_eq!(frame_field(&summary, "event"), Some("reconnected"));
    let data = frame_data(&summary);
    assert_eq!(data["missedCount"], 2);
    assert_eq!(data["fromSeq"], 3);
    assert_eq!(data["toSeq"], 5);
}

/// No token means no replay, but new events still arrive live.
#[tokio::test]
async fn test_no_replay_without_token() {
    let app = test_app(test_state());

    let events: Vec<_> = (1..=5)
        .map(|seq| event_with_id(&format!("e{seq}"), "s1", seq, "move"))
        .collect();
    app.clone()
        .oneshot(dispatch_request("s1", events))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get_request("/api/events?sessionId=s1"))
        .await
        .unwrap();
    let mut reader = SseReader::new(response.into_body());

    let connected = reader.next_frame().await.unwrap();
    assert_eq!(frame_field(&connected, "event"), Some("connected"));

    // The next frame is not a replay of 1..=5 but the newly dispatched 6.
    app.clone()
        .oneshot(dispatch_request(
            "s1",
            vec![event_with_id("e6", "s1", 6, "move")],
        ))
        .await
        .unwrap();

    let frame = reader.next_frame().await.unwrap();
    assert_eq!(frame_field(&frame, "id"), Some("e6"));
    assert_eq!(frame_data(&frame)["seq"], 6);
}

/// A malformed token degrades to a fresh connect.
#[tokio::test]
async fn test_malformed_token_goes_live() {
    let app = test_app(test_state());

    app.clone()
        .oneshot(dispatch_request(
            "s1",
            vec![event_with_id("e1", "s1", 1, "move")],
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get_request(
            "/api/events?sessionId=s1&lastEventId=garbage",
        ))
        .await
        .unwrap();
    let mut reader = SseReader::new(response.into_body());

    let connected = reader.next_frame().await.unwrap();
    assert_eq!(frame_data(&connected)["lastSeq"], 0);

    app.clone()
        .oneshot(dispatch_request(
            "s1",
            vec![event_with_id("e2", "s1", 2, "move")],
        ))
        .await
        .unwrap();

    // No replay of e1: the first frame after connected is the live e2.
    let frame = reader.next_frame().await.unwrap();
    assert_eq!(frame_field(&frame, "id"), Some("e2"));
}

/// Replay honors the retention window: evicted events are gone.
#[tokio::test]
async fn test_replay_reflects_eviction() {
    let app = test_app(test_state());

    let events: Vec<_> = (1..=120)
        .map(|seq| event_with_id(&format!("e{seq}"), "s1", seq, "move"))
        .collect();
    app.clone()
        .oneshot(dispatch_request("s1", events))
        .await
        .unwrap();

    let response = app
        .oneshot(get_request("/api/events?sessionId=s1&lastEventId=s1:0"))
        .await
        .unwrap();
    let mut reader = SseReader::new(response.into_body());

    let _connected = reader.next_frame().await.unwrap();

    // The oldest retained event is seq 21; the gap before it is silent.
    let first = reader.next_frame().await.unwrap();
    assert_eq!(frame_data(&first)["seq"], 21);
}

/// Events for one session never appear on another session's stream.
#[tokio::test]
async fn test_session_isolation() {
    let app = test_app(test_state());

    let response = app
        .clone()
        .oneshot(get_request("/api/events?sessionId=b"))
        .await
        .unwrap();
    let mut watcher_b = SseReader::new(response.into_body());
    let _connected = watcher_b.next_frame().await.unwrap();

    app.clone()
        .oneshot(dispatch_request(
            "a",
            vec![event_with_id("a1", "a", 1, "move")],
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(dispatch_request(
            "b",
            vec![event_with_id("b1", "b", 1, "move")],
        ))
        .await
        .unwrap();

    // The first event frame on B's stream is B's own, not A's.
    let frame = watcher_b.next_frame().await.unwrap();
    assert_eq!(frame_field(&frame, "id"), Some("b1"));
    assert_eq!(frame_data(&frame)["sessionId"], "b");
}

/// Two watchers of one session observe the same order.
#[tokio::test]
async fn test_watchers_share_event_order() {
    let app = test_app(test_state());

    let response = app
        .clone()
        .oneshot(get_request("/api/events?sessionId=s1"))
        .await
        .unwrap();
    let mut first = SseReader::new(response.into_body());
    let _ = first.next_frame().await.unwrap();

    let response = app
        .clone()
        .oneshot(get_request("/api/events?sessionId=s1"))
        .await
        .unwrap();
    let mut second = SseReader::new(response.into_body());
    let _ = second.next_frame().await.unwrap();

    let events: Vec<_> = (1..=3)
        .map(|seq| event_with_id(&format!("e{seq}"), "s1", seq, "move"))
        .collect();
    app.clone()
        .oneshot(dispatch_request("s1", events))
        .await
        .unwrap();

    for reader in [&mut first, &mut second] {
        for expected_seq in 1..=3 {
            let frame = reader.next_frame().await.unwrap();
            assert_eq!(frame_data(&frame)["seq"], expected_seq);
        }
    }
}

/// Idle streams carry heartbeat comment frames.
#[tokio::test]
async fn test_heartbeat_comment_frames() {
    // test_state uses a 200ms heartbeat.
    let app = test_app(test_state());

    let response = app
        .oneshot(get_request("/api/events?sessionId=s1"))
        .await
        .unwrap();
    let mut reader = SseReader::new(response.into_body());

    let _connected = reader.next_frame().await.unwrap();
    let heartbeat = reader.next_frame().await.unwrap();
    assert!(heartbeat.starts_with(':'));
}

/// Dispatch acknowledges the append, even with nobody watching.
#[tokio::test]
async fn test_dispatch_returns_accepted_count() {
    let state = test_state();
    let app = test_app(state.clone());

    let events: Vec<_> = (1..=2)
        .map(|seq| event_with_id(&format!("e{seq}"), "s1", seq, "move"))
        .collect();
    let response = app.oneshot(dispatch_request("s1", events)).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["accepted"], 2);

    let stats = state.hub.stats("s1");
    assert_eq!(stats.buffered_events, 2);
}

/// Session stats report buffer depth, head seq, and watcher count.
#[tokio::test]
async fn test_session_stats() {
    let app = test_app(test_state());

    let events: Vec<_> = (1..=4)
        .map(|seq| event_with_id(&format!("e{seq}"), "s1", seq, "move"))
        .collect();
    app.clone()
        .oneshot(dispatch_request("s1", events))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get_request("/api/sessions/s1/stats"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["sessionId"], "s1");
    assert_eq!(json["bufferedEvents"], 4);
    assert_eq!(json["latestSeq"], 4);
    assert_eq!(json["connections"], 0);
}

/// Action ingress forwards to the handler and relays its events.
#[tokio::test]
async fn test_action_ingress_dispatches_events() {
    let outcome = ActionOutcome {
        success: true,
        data: Some(json!({"applied": true})),
        error: None,
        events: Some(vec![event_with_id("e1", "s9", 1, "tool.applied")]),
    };
    let state = test_state().with_action_handler(Arc::new(ScriptedActionHandler { outcome }));
    let app = test_app(state);

    let response = app
        .clone()
        .oneshot(get_request("/api/events?sessionId=s9"))
        .await
        .unwrap();
    let mut watcher = SseReader::new(response.into_body());
    let _connected = watcher.next_frame().await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/actions")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({
                        "tool": "apply_move",
                        "arguments": {"sessionId": "s9"}
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["applied"], true);

    let frame = watcher.next_frame().await.unwrap();
    assert_eq!(frame_field(&frame, "event"), Some("tool.applied"));
    assert_eq!(frame_field(&frame, "id"), Some("e1"));
}

/// Without a configured handler the action ingress refuses cleanly.
#[tokio::test]
async fn test_action_ingress_without_handler() {
    let app = test_app(test_state());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/actions")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"tool": "apply_move"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
