//! Relay server and clients talking over localhost TCP

use std::time::Duration;

use pretty_assertions::assert_eq;
use relaychat_core::client::{Inbox, RelayClient};
use relaychat_core::config::{ClientSettings, ServerSettings};
use relaychat_core::error::RelayError;
use relaychat_core::protocol::{ChatFrame, FrameKind};
use relaychat_core::server::RelayServer;

async fn start_server() -> (RelayServer, ClientSettings) {
    let server = RelayServer::start(&ServerSettings {
        bind: "127.0.0.1:0".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();
    let settings = ClientSettings {
        server: server.local_addr().to_string(),
        ..Default::default()
    };
    (server, settings)
}

async fn registered(settings: &ClientSettings, name: &str) -> (RelayClient, Inbox) {
    let (client, inbox) = RelayClient::connect(settings).await.unwrap();
    client.register(name).await.unwrap();
    (client, inbox)
}

async fn next_frame(inbox: &mut Inbox) -> ChatFrame {
    tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .expect("no frame within 2s")
        .expect("connection closed")
}

/// Poll `check` until it holds or two seconds pass
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn test_duplicate_name_rejected() {
    let (_server, settings) = start_server().await;
    let (_alice, _inbox) = registered(&settings, "alice").await;

    let (other, _other_inbox) = RelayClient::connect(&settings).await.unwrap();
    assert_eq!(
        other.register("alice").await.unwrap_err(),
        RelayError::NameConflict {
            name: "alice".to_string()
        }
    );
    // The connection is still usable after a rejected name
    other.register("alice2").await.unwrap();
    assert_eq!(other.client_list().await.unwrap(), vec!["alice", "alice2"]);
}

#[tokio::test]
async fn test_broadcast_reaches_other_members_only() {
    let (server, settings) = start_server().await;
    let (alice, mut alice_inbox) = registered(&settings, "alice").await;
    let (bob, mut bob_inbox) = registered(&settings, "bob").await;

    alice.create_group("alice", "g1").await.unwrap();
    assert_eq!(alice.group_members("g1").await.unwrap(), vec!["alice"]);
    assert!(bob.join_group("bob", "g1").await.unwrap());
    assert_eq!(bob.group_list().await.unwrap(), vec!["g1"]);

    alice.route_chat("alice", "g1").await.unwrap();
    bob.route_chat("bob", "g1").await.unwrap();
    bob.send_frame(ChatFrame::message("bob", "g1", "hi")).await.unwrap();

    let frame = next_frame(&mut alice_inbox).await;
    assert_eq!(
        (frame.sender.as_str(), frame.receiver.as_str(), frame.message.as_str()),
        ("bob", "g1", "hi")
    );
    assert_eq!(frame.kind, FrameKind::Message);

    // bob's own departure notice is the next thing bob sees, nothing before it
    bob.send_frame(ChatFrame::left("bob", "g1")).await.unwrap();
    assert!(next_frame(&mut bob_inbox).await.is_departure_of("bob", "g1"));
    assert!(next_frame(&mut alice_inbox).await.is_departure_of("bob", "g1"));

    bob.leave_group("bob", "g1").await.unwrap();
    assert_eq!(alice.group_members("g1").await.unwrap(), vec!["alice"]);

    alice.send_frame(ChatFrame::left("alice", "g1")).await.unwrap();
    assert!(next_frame(&mut alice_inbox).await.is_departure_of("alice", "g1"));
    alice.leave_group("alice", "g1").await.unwrap();
    assert!(alice.group_list().await.unwrap().is_empty());
    assert!(server.relay().snapshot().is_consistent());
}

#[tokio::test]
async fn test_abrupt_disconnect_cleans_up() {
    let (server, settings) = start_server().await;
    let (alice, mut alice_inbox) = registered(&settings, "alice").await;
    let (bob, _bob_inbox) = registered(&settings, "bob").await;

    alice.create_group("alice", "g1").await.unwrap();
    bob.create_group("bob", "solo").await.unwrap();
    bob.join_group("bob", "g1").await.unwrap();
    alice.route_chat("alice", "g1").await.unwrap();

    drop(bob);

    // alice hears about it, bob's own group disappears with him
    assert!(next_frame(&mut alice_inbox).await.is_departure_of("bob", "g1"));
    let relay = server.relay().clone();
    assert!(eventually(|| !relay.exists("bob")).await);
    assert_eq!(relay.list_groups(), vec!["g1"]);
    assert_eq!(relay.list_members("g1").unwrap(), vec!["alice"]);

    // The name is free again
    let (_bob_again, _inbox) = registered(&settings, "bob").await;
}

#[tokio::test]
async fn test_last_member_leaving_removes_group() {
    let (_server, settings) = start_server().await;
    let (alice, _inbox) = registered(&settings, "alice").await;

    alice.create_group("alice", "g1").await.unwrap();
    alice.leave_group("alice", "g1").await.unwrap();
    assert!(alice.group_list().await.unwrap().is_empty());
    assert!(matches!(
        alice.join_group("alice", "g1").await.unwrap_err(),
        RelayError::GroupNotFound { .. }
    ));
}

#[tokio::test]
async fn test_unregister_frees_name() {
    let (server, settings) = start_server().await;
    let (alice, _inbox) = registered(&settings, "alice").await;
    alice.create_group("alice", "g1").await.unwrap();

    alice.unregister("alice").await.unwrap();
    assert!(server.relay().list_groups().is_empty());
    alice.register("alice").await.unwrap();
}

#[tokio::test]
async fn test_rejoin_starts_with_fresh_traffic() {
    let (_server, settings) = start_server().await;
    let (alice, mut alice_inbox) = registered(&settings, "alice").await;
    let (bob, mut bob_inbox) = registered(&settings, "bob").await;

    alice.create_group("alice", "g1").await.unwrap();
    bob.join_group("bob", "g1").await.unwrap();
    alice.route_chat("alice", "g1").await.unwrap();
    bob.route_chat("bob", "g1").await.unwrap();

    bob.send_frame(ChatFrame::left("bob", "g1")).await.unwrap();
    assert!(next_frame(&mut bob_inbox).await.is_departure_of("bob", "g1"));
    assert!(next_frame(&mut alice_inbox).await.is_departure_of("bob", "g1"));

    // bob's chat is over but he is still a member until his leave lands.
    // The call after the frame returns once the frame has been routed.
    alice
        .send_frame(ChatFrame::message("alice", "g1", "stale"))
        .await
        .unwrap();
    alice.group_list().await.unwrap();

    bob.leave_group("bob", "g1").await.unwrap();
    assert!(bob.join_group("bob", "g1").await.unwrap());
    bob.route_chat("bob", "g1").await.unwrap();

    alice
        .send_frame(ChatFrame::message("alice", "g1", "fresh"))
        .await
        .unwrap();
    let first = next_frame(&mut bob_inbox).await;
    assert_eq!(first.message, "fresh");
    assert!(bob_inbox.try_recv().is_none());
}
