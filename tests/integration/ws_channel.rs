// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! WebSocket channel tests against a minimal in-process server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use convosync::connection::ws::WsConnector;
use convosync::connection::{Channel, ChannelError, Connector, Credentials};
use convosync_proto::event::{ClientAction, ServerEvent};
use convosync_proto::message::UserId;

fn credentials() -> Credentials {
    Credentials {
        token: "tok".into(),
        user_id: "a9".into(),
        admin: true,
    }
}

/// Start a WebSocket server that accepts one connection, sends the given
/// text frames, then runs the provided epilogue ("close" or "hold").
async fn start_server(
    frames: Vec<String>,
    close_after: bool,
) -> (String, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}/live");

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws_stream = tokio_tungstenite::accept_async(stream).await.unwrap();

        for frame in frames {
            ws_stream.send(WsMessage::Text(frame.into())).await.unwrap();
        }

        let mut received = Vec::new();
        if close_after {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = ws_stream.close(None).await;
        } else {
            // Collect client frames until the client goes away.
            while let Some(Ok(msg)) = ws_stream.next().await {
                if let WsMessage::Text(text) = msg {
                    received.push(text.to_string());
                }
            }
        }
        received
    });

    (url, handle)
}

#[tokio::test]
async fn decodes_pushed_events() {
    let frames = vec![
        r#"{"event":"user-typing","data":{"userId":"u1","isTyping":true}}"#.to_string(),
        r#"{"event":"pong"}"#.to_string(),
    ];
    let (url, _handle) = start_server(frames, false).await;

    let connector = WsConnector::new(url, Duration::from_secs(5));
    let channel = connector.connect(&credentials()).await.unwrap();

    assert_eq!(
        channel.recv().await.unwrap(),
        ServerEvent::UserTyping {
            user_id: UserId::new("u1"),
            is_typing: true,
        }
    );
    assert_eq!(channel.recv().await.unwrap(), ServerEvent::Pong);
}

#[tokio::test]
async fn bad_frames_are_skipped_not_fatal() {
    let frames = vec![
        "{ not json".to_string(),
        r#"{"event":"user-banned","data":{}}"#.to_string(),
        r#"{"event":"pong"}"#.to_string(),
    ];
    let (url, _handle) = start_server(frames, false).await;

    let connector = WsConnector::new(url, Duration::from_secs(5));
    let channel = connector.connect(&credentials()).await.unwrap();

    // The two bad frames must be swallowed; the pong still arrives.
    let event = tokio::time::timeout(Duration::from_secs(2), channel.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, ServerEvent::Pong);
}

#[tokio::test]
async fn server_close_is_reported_as_server_initiated() {
    let (url, _handle) = start_server(Vec::new(), true).await;

    let connector = WsConnector::new(url, Duration::from_secs(5));
    let channel = connector.connect(&credentials()).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(2), channel.recv())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        ChannelError::Closed {
            server_initiated: true
        }
    ));
    assert!(!channel.is_open());
}

#[tokio::test]
async fn actions_are_encoded_as_tagged_frames() {
    let (url, handle) = start_server(Vec::new(), false).await;

    let connector = WsConnector::new(url, Duration::from_secs(5));
    let channel = connector.connect(&credentials()).await.unwrap();
    channel
        .send(&ClientAction::Join {
            conversation_id: UserId::new("u7"),
        })
        .await
        .unwrap();
    drop(channel);

    let received = handle.await.unwrap();
    assert_eq!(received.len(), 1);
    let value: serde_json::Value = serde_json::from_str(&received[0]).unwrap();
    assert_eq!(value["event"], "join-conversation");
    assert_eq!(value["data"]["conversationId"], "u7");
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let connector = WsConnector::new("ws://127.0.0.1:1/live", Duration::from_secs(2));
    assert!(connector.connect(&credentials()).await.is_err());
}
