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

//! Reconnect lifecycle tests: status transitions, subscription replay,
//! and state survival across connection loss.

use std::time::Duration;

use convosync::api::InMemoryApi;
use convosync::client::MessagingClient;
use convosync::config::SyncConfig;
use convosync::connection::loopback::LoopbackConnector;
use convosync::connection::{ConnectionManager, Credentials, ReconnectConfig};
use convosync_proto::event::{ClientAction, ConnectionStatus, ServerEvent};
use convosync_proto::message::{MessageId, Participant, Timestamp, UserId};

fn credentials() -> Credentials {
    Credentials {
        token: "tok".into(),
        user_id: "a9".into(),
        admin: true,
    }
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_attempts: 3,
    }
}

async fn wait_for(rx: &mut tokio::sync::watch::Receiver<ConnectionStatus>, wanted: ConnectionStatus) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if *rx.borrow_and_update() == wanted {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("status never reached");
}

/// Poll until the predicate holds (or panic after 2s).
///
/// Waiting on the status watch right after a sever would read the stale
/// `Connected` value and return before anything happened; polling an
/// observable effect such as the server's connect counter does not race.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn server_initiated_close_reconnects_immediately() {
    let (connector, server) = LoopbackConnector::new();
    let manager = ConnectionManager::new(connector, fast_reconnect(), 16);
    let mut status = manager.watch_status();

    manager.start(Some(credentials()));
    wait_for(&mut status, ConnectionStatus::Connected).await;
    assert_eq!(server.connect_count(), 1);

    server.sever(true);
    wait_until(|| server.connect_count() >= 2).await;
    wait_for(&mut status, ConnectionStatus::Connected).await;
    assert_eq!(server.connect_count(), 2);
}

#[tokio::test]
async fn link_drop_backs_off_then_reconnects() {
    let (connector, server) = LoopbackConnector::new();
    let manager = ConnectionManager::new(connector, fast_reconnect(), 16);
    let mut status = manager.watch_status();

    manager.start(Some(credentials()));
    wait_for(&mut status, ConnectionStatus::Connected).await;

    server.sever(false);
    wait_until(|| server.connect_count() >= 2).await;
    wait_for(&mut status, ConnectionStatus::Connected).await;
    assert!(server.connect_count() >= 2);
}

#[tokio::test]
async fn exhausted_attempts_reach_reconnect_failed() {
    let (connector, server) = LoopbackConnector::new();
    server.set_refuse(true);
    let manager = ConnectionManager::new(connector, fast_reconnect(), 16);
    let mut status = manager.watch_status();

    manager.start(Some(credentials()));
    wait_for(&mut status, ConnectionStatus::ReconnectFailed).await;
    // Initial attempt plus three retries.
    assert_eq!(server.connect_count(), 4);
}

#[tokio::test]
async fn events_flow_again_after_reconnect() {
    let (connector, server) = LoopbackConnector::new();
    let manager = ConnectionManager::new(connector, fast_reconnect(), 16);
    let mut status = manager.watch_status();
    let mut events = manager.subscribe();

    manager.start(Some(credentials()));
    wait_for(&mut status, ConnectionStatus::Connected).await;

    server.push(ServerEvent::Pong);
    assert_eq!(events.recv().await.unwrap(), ServerEvent::Pong);

    server.sever(true);
    wait_until(|| server.connect_count() >= 2).await;
    wait_for(&mut status, ConnectionStatus::Connected).await;

    server.push(ServerEvent::Pong);
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap(),
        ServerEvent::Pong
    );
}

#[tokio::test]
async fn open_conversations_are_rejoined_after_reconnect() {
    let (connector, mut server) = LoopbackConnector::new();
    let api = InMemoryApi::new(Participant::new(UserId::new("a9"), "Admin"));
    let config = SyncConfig {
        reconnect: fast_reconnect(),
        ..SyncConfig::default()
    };
    let (client, _notify) = MessagingClient::new(
        api,
        connector,
        Participant::new(UserId::new("a9"), "Admin"),
        true,
        config,
    );
    let mut status = client.watch_status();

    client.connect(Some(credentials()));
    wait_for(&mut status, ConnectionStatus::Connected).await;

    client.open_conversation(UserId::new("u1")).await.unwrap();
    let first_join = tokio::time::timeout(Duration::from_secs(2), server.next_action())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        first_join,
        ClientAction::Join {
            conversation_id: UserId::new("u1"),
        }
    );

    server.sever(true);
    wait_until(|| server.connect_count() >= 2).await;
    wait_for(&mut status, ConnectionStatus::Connected).await;

    // The client must re-subscribe on its own; the server kept nothing.
    let rejoined = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(ClientAction::Join { conversation_id }) = server.next_action().await {
                return conversation_id;
            }
        }
    })
    .await
    .expect("no rejoin observed");
    assert_eq!(rejoined, UserId::new("u1"));
}

#[tokio::test]
async fn local_state_survives_connection_loss() {
    let (connector, server) = LoopbackConnector::new();
    let api = InMemoryApi::new(Participant::new(UserId::new("a9"), "Admin"));
    api.set_history(
        UserId::new("u1"),
        vec![convosync_proto::message::Message {
            id: MessageId::new("m1"),
            content: "hello".into(),
            sender: Participant::new(UserId::new("u1"), "Pat"),
            receiver: UserId::admin(),
            attachments: Vec::new(),
            read: false,
            created_at: Timestamp::from_millis(1000),
            read_at: None,
        }],
    );
    let config = SyncConfig {
        reconnect: fast_reconnect(),
        ..SyncConfig::default()
    };
    let (client, _notify) = MessagingClient::new(
        api,
        connector,
        Participant::new(UserId::new("a9"), "Admin"),
        true,
        config,
    );
    let mut status = client.watch_status();

    client.connect(Some(credentials()));
    wait_for(&mut status, ConnectionStatus::Connected).await;
    client.open_conversation(UserId::new("u1")).await.unwrap();
    assert_eq!(client.messages(&UserId::new("u1")).len(), 1);

    server.sever(false);
    wait_until(|| server.connect_count() >= 2).await;
    wait_for(&mut status, ConnectionStatus::Connected).await;

    // Messages and conversation state are untouched by the drop.
    assert_eq!(client.messages(&UserId::new("u1")).len(), 1);
}

#[tokio::test]
async fn typing_indicators_clear_on_connection_loss() {
    let (connector, server) = LoopbackConnector::new();
    let api = InMemoryApi::new(Participant::new(UserId::new("a9"), "Admin"));
    let config = SyncConfig {
        reconnect: fast_reconnect(),
        ..SyncConfig::default()
    };
    let (client, _notify) = MessagingClient::new(
        api,
        connector,
        Participant::new(UserId::new("a9"), "Admin"),
        true,
        config,
    );
    let mut status = client.watch_status();

    client.connect(Some(credentials()));
    wait_for(&mut status, ConnectionStatus::Connected).await;

    server.push(ServerEvent::UserTyping {
        user_id: UserId::new("u1"),
        is_typing: true,
    });
    tokio::time::timeout(Duration::from_secs(2), async {
        while !client.is_typing(&UserId::new("u1")) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Refuse the handshake so the client stays in the reconnecting state
    // long enough to act on it, instead of flapping straight back.
    server.set_refuse(true);
    server.sever(false);
    wait_until(|| !client.is_typing(&UserId::new("u1"))).await;
}
