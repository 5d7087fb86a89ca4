//! Test utilities and fixtures for sealchat
//!
//! Starts in-process servers on loopback and drives them with real clients.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use sealchat::crypto::{ServerKeypair, DEFAULT_RSA_BITS};
use sealchat::msgserver::client::{self, ClientReceiver, ClientSender};
use sealchat::msgserver::message::{
    AuthPayload, LoginRequest, RegisterRequest, Request, ResponseAction, ServerResponse,
};
use sealchat::msgserver::{ActionRegistry, ServerInstance, ServerState, SqliteStore, Store, TokenManager};

pub const TIMEOUT: Duration = Duration::from_secs(10);
pub const TEST_SECRET: &str = "integration-test-secret";

/// Keys are expensive to generate, share them across tests
pub fn test_keypair() -> ServerKeypair {
    static KEYS: OnceLock<ServerKeypair> = OnceLock::new();
    KEYS.get_or_init(|| ServerKeypair::generate(DEFAULT_RSA_BITS).expect("Failed to generate keypair"))
        .clone()
}

pub fn test_state(store: Arc<dyn Store>) -> ServerState {
    ServerState::new(
        test_keypair(),
        TokenManager::with_secret(TEST_SECRET),
        store,
        ActionRegistry::with_default_actions(),
    )
}

/// Server on an ephemeral loopback port with an in-memory store
pub async fn start_server() -> ServerInstance {
    let store = Arc::new(SqliteStore::in_memory().expect("Failed to open in-memory store"));
    start_server_with(store).await
}

pub async fn start_server_with(store: Arc<dyn Store>) -> ServerInstance {
    ServerInstance::start("127.0.0.1:0", Arc::new(test_state(store)))
        .await
        .expect("Failed to start server")
}

/// Client-side password hash as the console sends it
pub fn password_hash(password: &str) -> String {
    sealchat::console::controllers::hash_password(password)
}

/// A connected, handshaken client
pub struct TestClient {
    pub sender: ClientSender,
    pub receiver: ClientReceiver,
}

impl TestClient {
    pub async fn connect(server: &ServerInstance) -> Self {
        let addr = server.local_addr().to_string();
        let (sender, receiver) = tokio::time::timeout(TIMEOUT, client::connect(&addr))
            .await
            .expect("Timed out connecting")
            .expect("Failed to connect");
        Self { sender, receiver }
    }

    /// Next response or push from the server
    pub async fn recv(&mut self) -> ServerResponse {
        tokio::time::timeout(TIMEOUT, self.receiver.next_response())
            .await
            .expect("Timed out waiting for the server")
            .expect("Read failed")
            .expect("Server closed the connection")
    }

    pub async fn call(&mut self, request: Request) -> ServerResponse {
        self.sender.send(request).await.expect("Send failed");
        self.recv().await
    }

    /// Register and keep the token for later requests
    pub async fn register(&mut self, login: &str, username: &str, password: &str) -> AuthPayload {
        let response = self
            .call(Request::Register(RegisterRequest {
                login: login.to_string(),
                username: username.to_string(),
                password_hash: password_hash(password),
            }))
            .await;
        self.accept_auth(response).await
    }

    pub async fn login(&mut self, login: &str, password: &str) -> AuthPayload {
        let response = self
            .call(Request::Login(LoginRequest {
                login: login.to_string(),
                password_hash: password_hash(password),
            }))
            .await;
        self.accept_auth(response).await
    }

    async fn accept_auth(&mut self, response: ServerResponse) -> AuthPayload {
        assert_eq!(response.action, ResponseAction::AuthSuccess, "{:?}", response);
        let auth: AuthPayload = response.payload().expect("Bad auth payload");
        self.sender.set_token(auth.token.clone()).await;
        auth
    }
}

/// Poll until `check` holds or the timeout passes
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
