//! Runtime configuration for the server and the console client.
//!
//! Values normally come from the `serve` / `connect` command line (with
//! `SEALCHAT_*` environment fallbacks); the defaults below let both sides
//! start with zero configuration for local development.

use rand::RngCore;
use std::path::PathBuf;

use crate::crypto::DEFAULT_RSA_BITS;
use crate::msgserver::auth::DEFAULT_TOKEN_VALIDITY_HOURS;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:12000";
pub const DEFAULT_DATABASE: &str = "sealchat.db";
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to accept TCP connections on.
    /// Env: `SEALCHAT_LISTEN`
    /// Default: `127.0.0.1:12000`
    pub listen_addr: String,

    /// SQLite database file, or `:memory:` for a throwaway store.
    /// Env: `SEALCHAT_DATABASE`
    pub database: PathBuf,

    /// Shared secret for signing tokens.
    /// Env: `SEALCHAT_JWT_SECRET`
    /// Default: none, a random secret is generated at startup.
    pub jwt_secret: Option<String>,

    /// HS256, HS384 or HS512
    pub jwt_algorithm: String,

    pub token_validity_hours: i64,

    /// Modulus size of the handshake keypair
    pub rsa_bits: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            database: PathBuf::from(DEFAULT_DATABASE),
            jwt_secret: None,
            jwt_algorithm: "HS256".to_string(),
            token_validity_hours: DEFAULT_TOKEN_VALIDITY_HOURS,
            rsa_bits: DEFAULT_RSA_BITS,
        }
    }
}

impl ServerConfig {
    pub fn is_in_memory(&self) -> bool {
        self.database.as_os_str() == IN_MEMORY_DATABASE
    }

    /// The configured secret, or a fresh random one.
    ///
    /// Tokens signed with a generated secret stop verifying after a restart.
    pub fn resolve_jwt_secret(&self) -> String {
        match self.jwt_secret.as_deref().filter(|secret| !secret.is_empty()) {
            Some(secret) => secret.to_string(),
            None => {
                tracing::warn!(
                    "No JWT secret configured, generating a random one; tokens will not survive a restart"
                );
                let mut bytes = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                hex::encode(bytes)
            }
        }
    }
}

/// Console client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to connect to.
    /// Env: `SEALCHAT_SERVER`
    pub server_addr: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}
