//! Integration tests for the WebSocket transport.
//!
//! These run the real pump task over an in-memory duplex pipe, with a
//! tungstenite server role on the far end, so the whole realtime path is
//! exercised without a network: raw frames in, decoded events out, and
//! the close-code reporting that feeds the reconnect policy.

use caseline_client::transport::{SocketEvent, attach};
use caseline_core::{ConnectionManager, MergeEngine, RECONNECT_DELAY, SocketAction};
use caseline_proto::{Dialect, InboundFrame, OutboundFrame, ThreadId};
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// A connected client handle and the server end of the pipe.
async fn pipe() -> (caseline_client::transport::SocketHandle, WebSocketStream<DuplexStream>) {
    let (client, server) = tokio::io::duplex(4096);
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    (attach(client), server)
}

#[tokio::test]
async fn pushed_frames_flow_into_the_merge_engine() {
    let (mut handle, mut server) = pipe().await;

    let raw = r#"{"type":"message","message":{
        "id": 42, "thread_id": "t1",
        "sender": {"name": "Dana", "role": "preparer"},
        "body": "your K-1 is ready",
        "created_at": "2026-02-10T09:30:00Z"
    }}"#;
    server.send(WsMessage::Text(raw.to_owned())).await.unwrap();

    let event = handle.events.recv().await.unwrap();
    let SocketEvent::Frame(frame) = event else {
        panic!("expected a frame event, got {event:?}");
    };
    let parsed = InboundFrame::parse(&Dialect::CLIENT_PORTAL, &frame).unwrap();
    let Some(InboundFrame::Message(message)) = parsed else {
        panic!("expected a message frame, got {parsed:?}");
    };

    let mut merge = MergeEngine::new(ThreadId::new("t1"));
    assert!(merge.apply_push(message));
    assert_eq!(merge.messages()[0].id.as_str(), "42");
    assert_eq!(merge.messages()[0].body, "your K-1 is ready");
}

#[tokio::test]
async fn outbound_frames_reach_the_server() {
    let (handle, mut server) = pipe().await;

    let frame = OutboundFrame::Typing { is_typing: true };
    assert!(handle.send(frame.encode(&Dialect::CLIENT_PORTAL)));

    let received = server.next().await.unwrap().unwrap();
    let WsMessage::Text(text) = received else {
        panic!("expected a text frame, got {received:?}");
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "typing");
    assert_eq!(value["is_typing"], true);
}

#[tokio::test]
async fn shutdown_sends_a_normal_closure_frame() {
    let (handle, mut server) = pipe().await;
    handle.shutdown();

    loop {
        match server.next().await {
            Some(Ok(WsMessage::Close(frame))) => {
                let frame = frame.expect("close frame should carry a code");
                assert_eq!(frame.code, CloseCode::Normal);
                break;
            },
            Some(Ok(other)) => panic!("expected a close frame, got {other:?}"),
            Some(Err(_)) | None => panic!("stream ended without a close frame"),
        }
    }
}

#[tokio::test]
async fn vanished_peer_reports_abnormal_close_and_schedules_a_reconnect() {
    let (mut handle, server) = pipe().await;
    // The peer disappears without a close handshake.
    drop(server);

    let event = handle.events.recv().await.unwrap();
    let SocketEvent::Closed { code } = event else {
        panic!("expected a close event, got {event:?}");
    };
    assert_eq!(code, 1006);

    // That close code drives the reconnect policy.
    let mut conn = ConnectionManager::new(true);
    let _ = conn.connect(Some(ThreadId::new("t1")));
    conn.opened();
    assert_eq!(conn.closed(code), vec![SocketAction::ScheduleReconnect {
        delay: RECONNECT_DELAY
    }]);
}
