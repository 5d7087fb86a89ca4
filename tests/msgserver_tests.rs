// Integration tests for the chat server over loopback TCP

mod test_utils;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

use sealchat::msgserver::message::{
    HistoryEntry, HistoryRequest, IncomingMessage, Request, ResponseAction, SendMessageRequest,
    ServerResponse, UserListRequest, UserSummary,
};
use sealchat::msgserver::{SqliteStore, Store};
use test_utils::*;

fn message(receiver_id: i64, content: &str) -> Request {
    Request::Message(SendMessageRequest {
        receiver_id,
        content: content.to_string(),
    })
}

#[tokio::test]
async fn test_first_line_is_public_key() {
    let server = start_server().await;

    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();

    let pem = String::from_utf8(STANDARD.decode(line.trim_end()).unwrap()).unwrap();
    assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handshake_and_register() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server).await;

    let auth = client.register("alice", "Alice", "wonderland").await;
    assert_eq!(auth.login, "alice");
    assert_eq!(auth.username, "Alice");

    let claims = server.state().tokens.verify(&auth.token).unwrap();
    assert_eq!(claims.user_id().unwrap(), auth.user_id);
    assert!(server.state().presence().is_online(auth.user_id).await);

    // Same account again is a conflict, connection stays usable
    let mut other = TestClient::connect(&server).await;
    let response = other
        .call(Request::Register(sealchat::msgserver::message::RegisterRequest {
            login: "alice".to_string(),
            username: "Impostor".to_string(),
            password_hash: password_hash("x"),
        }))
        .await;
    assert_eq!(response.action, ResponseAction::Error);

    let again = other.login("alice", "wonderland").await;
    assert_eq!(again.user_id, auth.user_id);
}

#[tokio::test]
async fn test_protected_action_requires_token() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server).await;

    let response = client.call(message(1, "hello")).await;
    assert_eq!(response, ServerResponse::error("Unauthorized: no token"));

    client.sender.set_token("forged.token.value".to_string()).await;
    let response = client.call(message(1, "hello")).await;
    assert_eq!(response, ServerResponse::error("Unauthorized: invalid token"));
}

#[tokio::test]
async fn test_push_between_two_clients() {
    let server = start_server().await;
    let mut alice = TestClient::connect(&server).await;
    let mut bob = TestClient::connect(&server).await;

    let alice_auth = alice.register("alice", "Alice", "pw-alice").await;
    let bob_auth = bob.register("bob", "Bob", "pw-bob").await;

    let response = alice.call(message(bob_auth.user_id, "hi bob, how are you?")).await;
    assert_eq!(response, ServerResponse::success("Message sent"));

    let push = bob.recv().await;
    assert_eq!(push.action, ResponseAction::NewMessage);
    let incoming: IncomingMessage = push.payload().unwrap();
    assert_eq!(incoming.sender_id, alice_auth.user_id);
    assert_eq!(incoming.sender_login, "alice");
    assert_eq!(incoming.content, "hi bob, how are you?");

    let stored = server
        .state()
        .store()
        .messages_between(alice_auth.user_id, bob_auth.user_id, 1)
        .unwrap();
    assert!(stored[0].delivered);

    // Bob's reply reaches Alice the same way
    bob.call(message(alice_auth.user_id, "fine")).await;
    let push = alice.recv().await;
    let incoming: IncomingMessage = push.payload().unwrap();
    assert_eq!(incoming.content, "fine");

    let history = alice
        .call(Request::History(HistoryRequest {
            target_user_id: bob_auth.user_id,
            limit: 50,
        }))
        .await;
    assert_eq!(history.action, ResponseAction::MessageHistoryResult);
    let entries: Vec<HistoryEntry> = history.payload().unwrap();
    let contents: Vec<_> = entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["hi bob, how are you?", "fine"]);
    assert!(entries[0].is_me);
    assert!(!entries[1].is_me);
}

#[tokio::test]
async fn test_offline_delivery_and_presence_cleanup() {
    let server = start_server().await;
    let mut alice = TestClient::connect(&server).await;
    let alice_auth = alice.register("alice", "Alice", "pw").await;

    let bob_id = {
        let mut bob = TestClient::connect(&server).await;
        bob.register("bob", "Bob", "pw").await.user_id
    };

    let presence = server.state().presence().clone();
    assert!(eventually(|| {
        let presence = presence.clone();
        async move { !presence.is_online(bob_id).await }
    })
    .await);

    let response = alice.call(message(bob_id, "are you there?")).await;
    assert_eq!(response, ServerResponse::success("Message sent"));

    let stored = server
        .state()
        .store()
        .messages_between(alice_auth.user_id, bob_id, 1)
        .unwrap();
    assert!(!stored[0].delivered);

    // Bob comes back and finds it in his history
    let mut bob = TestClient::connect(&server).await;
    bob.login("bob", "pw").await;
    let history = bob
        .call(Request::History(HistoryRequest {
            target_user_id: alice_auth.user_id,
            limit: 10,
        }))
        .await;
    let entries: Vec<HistoryEntry> = history.payload().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "are you there?");
    assert!(!entries[0].is_me);
}

#[tokio::test]
async fn test_relogin_replaces_stale_session() {
    let server = start_server().await;
    let mut alice = TestClient::connect(&server).await;
    alice.register("alice", "Alice", "pw").await;

    let mut first = TestClient::connect(&server).await;
    let bob_id = first.register("bob", "Bob", "pw").await.user_id;
    let mut second = TestClient::connect(&server).await;
    second.login("bob", "pw").await;

    // The older connection closing must not take Bob offline
    drop(first);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(server.state().presence().is_online(bob_id).await);

    alice.call(message(bob_id, "which one?")).await;
    let push = second.recv().await;
    let incoming: IncomingMessage = push.payload().unwrap();
    assert_eq!(incoming.content, "which one?");
}

#[tokio::test]
async fn test_user_list_and_search() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server).await;
    for (login, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
        client.register(login, name, "pw").await;
    }

    let response = client
        .call(Request::UserList(UserListRequest {
            page: 1,
            page_size: 2,
            search_query: None,
        }))
        .await;
    assert_eq!(response.action, ResponseAction::UserListResult);
    let users: Vec<UserSummary> = response.payload().unwrap();
    assert_eq!(users.len(), 2);

    let response = client
        .call(Request::UserList(UserListRequest {
            page: 1,
            page_size: 5,
            search_query: Some("car".to_string()),
        }))
        .await;
    let users: Vec<UserSummary> = response.payload().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].login, "carol");
}

#[tokio::test]
async fn test_message_to_unknown_user() {
    let server = start_server().await;
    let mut client = TestClient::connect(&server).await;
    client.register("alice", "Alice", "pw").await;

    let response = client.call(message(9999, "anyone?")).await;
    assert_eq!(response, ServerResponse::error("User 9999 not found"));
}

#[tokio::test]
async fn test_file_database_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chat.db");

    let server = start_server_with(Arc::new(SqliteStore::open(&path).unwrap())).await;
    let mut client = TestClient::connect(&server).await;
    let auth = client.register("alice", "Alice", "pw").await;
    drop(client);
    server.shutdown().await.unwrap();

    let store = SqliteStore::open(&path).unwrap();
    let user = store.find_user_by_login("alice").unwrap().unwrap();
    assert_eq!(user.id, auth.user_id);
    assert_ne!(user.password_hash, password_hash("pw"));
}
