//! Integration tests for the reconnecting bridge against a local
//! WebSocket endpoint.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use worker_bridge::bridge::BridgeEvent;
use worker_bridge::provider::{
    format_time, spawn_query_responder, FileProvider, PlayerSnapshot, SharedSnapshot,
};
use worker_bridge::AppError;

use super::test_helpers::{accept_ws, test_bridge, wait_for_bridge_event, worker_endpoint};

fn is_open(event: &BridgeEvent) -> bool {
    matches!(event, BridgeEvent::Open)
}

fn is_close(event: &BridgeEvent) -> bool {
    matches!(event, BridgeEvent::Close)
}

/// Next text frame from the bridge, parsed as JSON.
async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                Some(Ok(_)) => {}
                other => panic!("connection ended while waiting for a frame: {other:?}"),
            }
        }
    })
    .await
    .expect("frame before timeout");
    serde_json::from_str(&text).expect("json frame")
}

async fn expect_no_dial(listener: &TcpListener, within: Duration) {
    let dialled = tokio::time::timeout(within, listener.accept()).await;
    assert!(dialled.is_err(), "bridge dialled again after shutdown");
}

#[tokio::test]
async fn query_is_answered_with_echo() {
    let (listener, url) = worker_endpoint().await;
    let bridge = test_bridge(&url);
    let mut events = bridge.subscribe();
    let ct = CancellationToken::new();
    let responder = spawn_query_responder(
        bridge.subscribe(),
        Arc::new(SharedSnapshot::default()),
        ct.clone(),
    );

    bridge.reconnect().await;
    let mut ws = accept_ws(&listener).await;
    wait_for_bridge_event(&mut events, is_open).await;
    assert!(bridge.is_connected());

    ws.send(Message::text(r#"{"type":"query","data":{},"echo":"e1"}"#))
        .await
        .expect("send");
    let answer = next_json(&mut ws).await;

    assert_eq!(answer["echo"], "e1");
    let expected = serde_json::to_value(PlayerSnapshot::empty()).expect("json");
    assert_eq!(answer["data"], expected);

    ct.cancel();
    responder.await.expect("responder exits");
    bridge.shutdown().await;
}

#[tokio::test]
async fn query_is_answered_from_snapshot_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("snapshot.json");
    let mut snapshot = PlayerSnapshot::empty();
    snapshot.track.title = "Song".into();
    snapshot.track.duration = 187;
    snapshot.track.duration_human = format_time(187);
    std::fs::write(&path, serde_json::to_string(&snapshot).expect("json")).expect("write");

    let (listener, url) = worker_endpoint().await;
    let bridge = test_bridge(&url);
    let mut events = bridge.subscribe();
    let ct = CancellationToken::new();
    let responder = spawn_query_responder(
        bridge.subscribe(),
        Arc::new(FileProvider::new(&path)),
        ct.clone(),
    );

    bridge.reconnect().await;
    let mut ws = accept_ws(&listener).await;
    wait_for_bridge_event(&mut events, is_open).await;

    ws.send(Message::text(r#"{"type":"query","data":{},"echo":"f1"}"#))
        .await
        .expect("send");
    let answer = next_json(&mut ws).await;

    assert_eq!(answer["echo"], "f1");
    assert_eq!(answer["data"]["track"]["title"], "Song");
    assert_eq!(answer["data"]["track"]["durationHuman"], "3:07");

    ct.cancel();
    responder.await.expect("responder exits");
    bridge.shutdown().await;
}

#[tokio::test]
async fn invalid_frames_are_dropped_without_closing() {
    let (listener, url) = worker_endpoint().await;
    let bridge = test_bridge(&url);
    let mut events = bridge.subscribe();
    let ct = CancellationToken::new();
    let _responder = spawn_query_responder(
        bridge.subscribe(),
        Arc::new(SharedSnapshot::default()),
        ct.clone(),
    );

    bridge.reconnect().await;
    let mut ws = accept_ws(&listener).await;
    wait_for_bridge_event(&mut events, is_open).await;

    for frame in ["not json", r#"{"data":{}}"#, r#"{"type":"query"}"#] {
        ws.send(Message::text(frame)).await.expect("send");
    }
    ws.send(Message::text("{".repeat(64 * 1024)))
        .await
        .expect("send");
    ws.send(Message::binary(vec![1_u8, 2, 3])).await.expect("send");
    ws.send(Message::text(r#"{"type":"query","data":{},"echo":2}"#))
        .await
        .expect("send");

    let answer = next_json(&mut ws).await;
    assert_eq!(answer["echo"], 2);
    assert!(bridge.is_connected());

    ct.cancel();
    bridge.shutdown().await;
}

#[tokio::test]
async fn other_request_types_are_published_and_answerable() {
    let (listener, url) = worker_endpoint().await;
    let bridge = test_bridge(&url);
    let mut events = bridge.subscribe();

    bridge.reconnect().await;
    let mut ws = accept_ws(&listener).await;
    wait_for_bridge_event(&mut events, is_open).await;

    ws.send(Message::text(r#"{"type":"custom","data":{"a":1}}"#))
        .await
        .expect("send");

    let event =
        wait_for_bridge_event(&mut events, |e| matches!(e, BridgeEvent::Request(_))).await;
    let BridgeEvent::Request(request) = event else {
        unreachable!()
    };
    assert_eq!(request.event_name(), "request/custom");
    assert_eq!(request.data, json!({"a": 1}));
    assert!(request.echo().is_none());

    request.answer(&json!("pong")).expect("answer queued");
    assert_eq!(next_json(&mut ws).await, json!({"data": "pong"}));

    bridge.shutdown().await;
}

#[tokio::test]
async fn unexpected_close_reconnects_after_delay() {
    let (listener, url) = worker_endpoint().await;
    let bridge = test_bridge(&url);
    let mut events = bridge.subscribe();

    bridge.reconnect().await;
    let mut ws = accept_ws(&listener).await;
    wait_for_bridge_event(&mut events, is_open).await;

    ws.close(None).await.expect("close");
    drop(ws);
    wait_for_bridge_event(&mut events, is_close).await;
    assert!(!bridge.is_connected());
    assert!(!bridge.is_stopped().await);

    let _ws = accept_ws(&listener).await;
    wait_for_bridge_event(&mut events, is_open).await;
    assert!(bridge.is_connected());

    bridge.shutdown().await;
}

#[tokio::test]
async fn shutdown_inside_reconnect_delay_suppresses_redial() {
    let (listener, url) = worker_endpoint().await;
    let bridge = test_bridge(&url);
    let mut events = bridge.subscribe();

    bridge.reconnect().await;
    let mut ws = accept_ws(&listener).await;
    wait_for_bridge_event(&mut events, is_open).await;

    ws.close(None).await.expect("close");
    drop(ws);
    wait_for_bridge_event(&mut events, is_close).await;
    assert!(!bridge.is_stopped().await);

    bridge.shutdown().await;

    expect_no_dial(&listener, Duration::from_millis(600)).await;
    assert!(bridge.is_stopped().await);
    assert!(!bridge.is_connected());
}

#[tokio::test]
async fn connect_failure_is_retried() {
    let (listener, url) = worker_endpoint().await;
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let bridge = test_bridge(&url);
    let mut events = bridge.subscribe();
    bridge.reconnect().await;

    // One Close from the reconnect teardown, one from the refused dial.
    wait_for_bridge_event(&mut events, is_close).await;
    wait_for_bridge_event(&mut events, is_close).await;
    assert!(!bridge.is_connected());

    let listener = TcpListener::bind(addr).await.expect("rebind");
    let _ws = accept_ws(&listener).await;
    wait_for_bridge_event(&mut events, is_open).await;

    bridge.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_and_stops_reconnecting() {
    let (listener, url) = worker_endpoint().await;
    let bridge = test_bridge(&url);
    let mut events = bridge.subscribe();

    bridge.reconnect().await;
    let mut ws = accept_ws(&listener).await;
    wait_for_bridge_event(&mut events, is_open).await;

    bridge.shutdown().await;
    wait_for_bridge_event(&mut events, is_close).await;
    assert!(!bridge.is_connected());
    assert!(bridge.is_stopped().await);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "worker side never saw the close");

    expect_no_dial(&listener, Duration::from_millis(500)).await;
}

#[tokio::test]
async fn shutdown_without_connection_still_emits_close() {
    let bridge = test_bridge("ws://127.0.0.1:9/unused");
    let mut events = bridge.subscribe();

    bridge.shutdown().await;

    assert!(is_close(&events.try_recv().expect("close emitted")));
    assert!(bridge.is_stopped().await);
}

#[tokio::test]
async fn answer_after_shutdown_reports_closed_connection() {
    let (listener, url) = worker_endpoint().await;
    let bridge = test_bridge(&url);
    let mut events = bridge.subscribe();

    bridge.reconnect().await;
    let mut ws = accept_ws(&listener).await;
    wait_for_bridge_event(&mut events, is_open).await;

    ws.send(Message::text(r#"{"type":"late","data":null,"echo":1}"#))
        .await
        .expect("send");
    let event =
        wait_for_bridge_event(&mut events, |e| matches!(e, BridgeEvent::Request(_))).await;
    let BridgeEvent::Request(request) = event else {
        unreachable!()
    };

    bridge.shutdown().await;

    let failed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Err(err) = request.answer(&json!(null)) {
                return err;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("answer fails once the connection task ends");
    assert!(matches!(failed, AppError::Bridge(_)));
}
