// TCP listener and per-connection session loop

use anyhow::{Context, Result};
use chrono::Duration;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::crypto::ServerKeypair;
use crate::error::TransportError;
use crate::msgserver::auth::TokenManager;
use crate::msgserver::handshake::server_handshake;
use crate::msgserver::message::ServerResponse;
use crate::msgserver::router::{ActionRegistry, ServerState};
use crate::msgserver::session::SessionContext;
use crate::msgserver::storage::{SqliteStore, Store};
use crate::msgserver::transport::{FrameReader, FrameWriter, Inbound, SessionSender};

/// Build the shared server state: keypair, token manager, store and the
/// built-in actions.
pub fn build_state(config: &ServerConfig) -> Result<ServerState> {
    tracing::info!("Generating {}-bit RSA keypair", config.rsa_bits);
    let keys = ServerKeypair::generate(config.rsa_bits).context("Failed to generate server keypair")?;

    let tokens = TokenManager::new(
        &config.resolve_jwt_secret(),
        &config.jwt_algorithm,
        Duration::hours(config.token_validity_hours),
    )
    .context("Invalid token configuration")?;

    let store: Arc<dyn Store> = if config.is_in_memory() {
        tracing::info!("Using in-memory database");
        Arc::new(SqliteStore::in_memory().context("Failed to open in-memory database")?)
    } else {
        tracing::info!("Using database {:?}", config.database);
        Arc::new(
            SqliteStore::open(&config.database)
                .with_context(|| format!("Failed to open database {:?}", config.database))?,
        )
    };

    let registry = ActionRegistry::with_default_actions();
    tracing::info!("Registered actions: {}", registry.names().join(", "));

    Ok(ServerState::new(keys, tokens, store, registry))
}

/// A running listener
pub struct ServerInstance {
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl ServerInstance {
    /// Bind `addr` and start accepting connections in the background
    pub async fn start(addr: &str, state: Arc<ServerState>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        let local_addr = listener.local_addr().context("Failed to read local address")?;
        tracing::info!("Listening on {}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
        let listener_state = state.clone();
        let task = tokio::spawn(async move {
            run_listener(listener, listener_state, &mut shutdown_rx).await;
        });

        Ok(Self {
            local_addr,
            state,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Stop accepting new connections and wait for the listener to exit.
    /// Sessions already running finish on their own.
    pub async fn shutdown(self) -> Result<()> {
        // The listener may already be gone
        let _ = self.shutdown_tx.send(());
        self.task.await.context("Listener task failed")?;
        Ok(())
    }
}

/// Accept until a shutdown signal arrives
async fn run_listener(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_rx: &mut mpsc::UnboundedReceiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, state).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Listener shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
    }
    let (read_half, write_half) = stream.into_split();
    serve_connection(read_half, write_half, Some(peer), state).await;
}

/// Run one connection from handshake to disconnect
pub async fn serve_connection(
    read: impl AsyncRead + Unpin + Send + 'static,
    write: impl AsyncWrite + Unpin + Send + 'static,
    peer: Option<SocketAddr>,
    state: Arc<ServerState>,
) {
    let mut reader = FrameReader::new(BufReader::new(read));
    let sender = SessionSender::new(FrameWriter::new(write));
    let mut session = SessionContext::new(peer, sender.clone());
    tracing::info!("Connection accepted: {}", session.label());

    if let Err(e) = server_handshake(&mut reader, &sender, &state.keys).await {
        tracing::warn!("Handshake with {} failed: {}", session.label(), e);
        let _ = sender.shutdown().await;
        return;
    }
    tracing::debug!("Session {} encrypted", session.id());

    if let Err(e) = session_loop(&mut reader, &mut session, &state).await {
        tracing::warn!("Session {} ended with error: {}", session.id(), e);
    }

    if let Some(user_id) = session.online_as() {
        state
            .presence()
            .remove_if_current(user_id, session.id())
            .await;
    }
    let _ = sender.shutdown().await;
    tracing::info!("Connection closed: {}", session.label());
}

async fn session_loop(
    reader: &mut FrameReader,
    session: &mut SessionContext,
    state: &ServerState,
) -> Result<(), TransportError> {
    while let Some(inbound) = reader.read_document().await? {
        let reply = match inbound {
            Inbound::Document(raw) => state.dispatch(session, raw).await,
            Inbound::Malformed(e) => {
                tracing::debug!("Session {} sent a malformed frame: {}", session.id(), e);
                ServerResponse::error(e.to_string())
            }
        };
        session.reply(&reply).await?;
    }
    Ok(())
}

/// Serve until Ctrl+C
pub async fn run(config: ServerConfig) -> Result<()> {
    let state = Arc::new(build_state(&config)?);
    let instance = ServerInstance::start(&config.listen_addr, state).await?;

    println!("sealchat server listening on {}", instance.local_addr());
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown requested");

    instance.shutdown().await
}
