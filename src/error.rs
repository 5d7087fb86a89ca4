// Error taxonomy shared by the server, the transport and the console client

use thiserror::Error;

/// Errors surfaced to a peer as an `error` reply.
///
/// Everything except `Internal` is shown to the peer verbatim. `Internal`
/// keeps its detail for the local log and is reported generically.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl ChatError {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        ChatError::Internal(err.into())
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ChatError::Conflict(msg),
            other => ChatError::Internal(other.into()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("No endpoint: request has no action")]
    MissingAction,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Packet validation failed: {}", .0.join("; "))]
    PacketValidation(Vec<String>),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

/// Credential failures. `Expired` and `Invalid` are the two verification
/// outcomes; both are reported to the peer as "invalid token".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no token")]
    MissingToken,

    #[error("expired token")]
    Expired,

    #[error("invalid token")]
    Invalid,

    #[error("invalid login or password")]
    BadCredentials,

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: wrong key or corrupted ciphertext")]
    Decryption,

    #[error("Invalid ciphertext: tampered data or key mismatch")]
    InvalidCiphertext,

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Peer closed the connection during handshake")]
    Closed,

    #[error("Malformed handshake line: {0}")]
    Malformed(String),

    #[error("Handshake crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Handshake step called in state {0:?}")]
    WrongState(crate::msgserver::handshake::HandshakeState),

    #[error("Handshake transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Frame encryption failed: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database path error: {0}")]
    Io(#[from] std::io::Error),
}

/// Console command failures.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid argument '{token}': expected {expected}")]
    ArgumentType { token: String, expected: &'static str },

    #[error("Wrong number of arguments. Usage: {usage}")]
    ArgumentCount { usage: String },

    #[error("Command failed: {0}")]
    Handler(#[from] anyhow::Error),
}
