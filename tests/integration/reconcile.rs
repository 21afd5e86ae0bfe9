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

//! End-to-end reconciliation tests: live events and REST responses
//! arriving in adversarial orders must still produce consistent local
//! state.

use std::time::Duration;

use convosync::api::InMemoryApi;
use convosync::client::MessagingClient;
use convosync::config::SyncConfig;
use convosync::connection::loopback::{LoopbackConnector, LoopbackServer};
use convosync::connection::Credentials;
use convosync_proto::event::{ClientAction, ConnectionStatus, ServerEvent};
use convosync_proto::message::{MessageId, Participant, Timestamp, UserId};

type TestClient = MessagingClient<InMemoryApi, LoopbackConnector>;

fn admin_profile() -> Participant {
    Participant::new(UserId::new("a9"), "Admin")
}

fn credentials() -> Credentials {
    Credentials {
        token: "tok".into(),
        user_id: "a9".into(),
        admin: true,
    }
}

/// Route engine logs through the test harness when `RUST_LOG` is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (TestClient, LoopbackServer, InMemoryApi) {
    init_tracing();
    let (connector, server) = LoopbackConnector::new();
    let api = InMemoryApi::new(admin_profile());
    let (client, _notify) = MessagingClient::new(
        api.clone(),
        connector,
        admin_profile(),
        true,
        SyncConfig::default(),
    );
    (client, server, api)
}

fn inbound(id: &str, from: &str, at: u64) -> convosync_proto::message::Message {
    convosync_proto::message::Message {
        id: MessageId::new(id),
        content: format!("msg {id}"),
        sender: Participant::new(UserId::new(from), "Pat"),
        receiver: UserId::admin(),
        attachments: Vec::new(),
        read: false,
        created_at: Timestamp::from_millis(at),
        read_at: None,
    }
}

/// Wait until the client reports the given status (or panic after 2s).
async fn wait_for_status(client: &TestClient, wanted: ConnectionStatus) {
    let mut rx = client.watch_status();
    let deadline = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if *rx.borrow_and_update() == wanted {
                return;
            }
            rx.changed().await.unwrap();
        }
    });
    deadline.await.expect("status never reached");
}

/// Wait until the predicate holds (or panic after 2s).
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
async fn live_event_after_history_fetch_lands_once() {
    let (client, server, _) = setup();
    client.connect(Some(credentials()));
    wait_for_status(&client, ConnectionStatus::Connected).await;

    client.open_conversation(UserId::new("u1")).await.unwrap();

    // The same message arrives over the live channel twice.
    server.push(ServerEvent::NewMessage(inbound("m1", "u1", 1000)));
    server.push(ServerEvent::NewMessage(inbound("m1", "u1", 1000)));

    wait_until(|| !client.messages(&UserId::new("u1")).is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.messages(&UserId::new("u1")).len(), 1);
    let summary = client
        .conversations()
        .into_iter()
        .find(|c| c.user.id == UserId::new("u1"))
        .unwrap();
    assert_eq!(summary.unread_count, 0, "open view must not count unread");
}

#[tokio::test]
async fn closed_view_accumulates_unread_and_promotes() {
    let (client, server, _) = setup();
    client.connect(Some(credentials()));
    wait_for_status(&client, ConnectionStatus::Connected).await;

    server.push(ServerEvent::NewMessage(inbound("m1", "u1", 1000)));
    server.push(ServerEvent::NewMessage(inbound("m2", "u2", 2000)));
    server.push(ServerEvent::NewMessage(inbound("m3", "u1", 3000)));

    wait_until(|| client.total_unread() == 3).await;

    let conversations = client.conversations();
    assert_eq!(conversations[0].user.id, UserId::new("u1"));
    assert_eq!(conversations[0].unread_count, 2);
    assert_eq!(conversations[1].unread_count, 1);
}

#[tokio::test]
async fn remote_read_receipt_flips_flag_without_counter_change() {
    let (client, server, _) = setup();
    client.connect(Some(credentials()));
    wait_for_status(&client, ConnectionStatus::Connected).await;

    client.open_conversation(UserId::new("u1")).await.unwrap();
    let sent = client
        .send("hello", &UserId::new("u1"), Vec::new())
        .await
        .unwrap();

    server.push(ServerEvent::MessageRead {
        message_id: sent.id.clone(),
    });
    wait_until(|| {
        client
            .messages(&UserId::new("u1"))
            .first()
            .is_some_and(|m| m.read)
    })
    .await;
    assert_eq!(client.total_unread(), 0);
}

#[tokio::test]
async fn own_echo_over_live_channel_does_not_duplicate_send() {
    let (client, server, _) = setup();
    client.connect(Some(credentials()));
    wait_for_status(&client, ConnectionStatus::Connected).await;

    client.open_conversation(UserId::new("u1")).await.unwrap();
    let sent = client
        .send("hello", &UserId::new("u1"), Vec::new())
        .await
        .unwrap();

    // The server also broadcasts our own message back to us.
    server.push(ServerEvent::NewMessage(sent.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.messages(&UserId::new("u1")).len(), 1);
    let summary = client
        .conversations()
        .into_iter()
        .find(|c| c.user.id == UserId::new("u1"))
        .unwrap();
    assert_eq!(summary.unread_count, 0);
}

#[tokio::test]
async fn typing_indicator_tracks_start_and_stop() {
    let (client, server, _) = setup();
    client.connect(Some(credentials()));
    wait_for_status(&client, ConnectionStatus::Connected).await;

    server.push(ServerEvent::UserTyping {
        user_id: UserId::new("u1"),
        is_typing: true,
    });
    wait_until(|| client.is_typing(&UserId::new("u1"))).await;

    server.push(ServerEvent::UserTyping {
        user_id: UserId::new("u1"),
        is_typing: false,
    });
    wait_until(|| !client.is_typing(&UserId::new("u1"))).await;
}

#[tokio::test]
async fn join_leave_and_typing_actions_reach_the_server() {
    let (client, mut server, _) = setup();
    client.connect(Some(credentials()));
    wait_for_status(&client, ConnectionStatus::Connected).await;

    client.open_conversation(UserId::new("u1")).await.unwrap();
    client.set_typing(&UserId::new("u1"), true).await;
    client.close_conversation(&UserId::new("u1")).await;

    let mut names = Vec::new();
    for _ in 0..3 {
        let action = tokio::time::timeout(Duration::from_secs(2), server.next_action())
            .await
            .unwrap()
            .unwrap();
        names.push(action.name());
    }
    assert_eq!(
        names,
        vec!["join-conversation", "typing", "leave-conversation"]
    );
}

#[tokio::test]
async fn actions_are_dropped_when_disconnected() {
    let (client, mut server, _) = setup();
    // Never connected: the emit must be dropped, not queued.
    client.set_typing(&UserId::new("u1"), true).await;

    client.connect(Some(credentials()));
    wait_for_status(&client, ConnectionStatus::Connected).await;
    client.set_typing(&UserId::new("u1"), false).await;

    let action = tokio::time::timeout(Duration::from_secs(2), server.next_action())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        action,
        ClientAction::Typing {
            conversation_id: UserId::new("u1"),
            is_typing: false,
        }
    );
    assert!(server.try_next_action().is_none());
}
