// Encrypted messaging server
//
// Connections start with an RSA key exchange, then carry one encrypted JSON
// document per line. Documents are routed to actions by name; protected
// actions require a bearer token. Online users receive messages as they are
// sent; everyone else finds them in their history.

pub mod message;
pub mod storage;
pub mod transport;
pub mod handshake;
pub mod session;
pub mod auth;
pub mod broker;
pub mod router;
pub mod actions;
pub mod server;
pub mod client;
pub mod cli;
pub mod commands;

pub use message::{Request, RequestEnvelope, ResponseAction, ServerResponse};
pub use storage::{SqliteStore, Store};
pub use auth::TokenManager;
pub use broker::{MessageBroker, PresenceDirectory};
pub use router::{ActionDescriptor, ActionRegistry, ServerState};
pub use server::{build_state, ServerInstance};
pub use cli::{ChatCli, ChatCommand};
pub use commands::execute_command;
