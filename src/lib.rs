//! sealchat - encrypted client-server direct messaging
//!
//! A server and console client speaking a line-framed protocol: an RSA-OAEP
//! key exchange per connection, then XChaCha20-Poly1305 sealed JSON
//! documents. Requests are routed to named actions, protected by JWT bearer
//! tokens, and online users get messages pushed to them as they arrive.

pub mod config;
pub mod console;
pub mod crypto;
pub mod error;
pub mod msgserver;

pub use config::{ClientConfig, ServerConfig};
pub use error::ChatError;
