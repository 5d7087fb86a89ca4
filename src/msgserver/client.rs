// Client side of a connection: dial, handshake, then encrypted requests

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::RwLock;

use crate::msgserver::handshake::client_handshake;
use crate::msgserver::message::{Request, RequestEnvelope, ServerResponse};
use crate::msgserver::transport::{FrameReader, FrameWriter, SessionSender};

/// What the client received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Response(ServerResponse),
    /// A line that decrypted but is not a valid response
    Unparseable(String),
}

/// Reading side of a client connection
pub struct ClientReceiver {
    reader: FrameReader,
}

impl ClientReceiver {
    /// Next event from the server. `None` once the server hangs up.
    pub async fn recv(&mut self) -> Result<Option<ServerEvent>> {
        let Some(text) = self
            .reader
            .read_text()
            .await
            .context("Failed to read from server")?
        else {
            return Ok(None);
        };

        let event = match serde_json::from_str::<ServerResponse>(&text) {
            Ok(response) => ServerEvent::Response(response),
            Err(e) => {
                tracing::debug!("Unparseable server line: {}", e);
                ServerEvent::Unparseable(text)
            }
        };
        Ok(Some(event))
    }

    /// Next `ServerResponse`, skipping anything unparseable
    pub async fn next_response(&mut self) -> Result<Option<ServerResponse>> {
        while let Some(event) = self.recv().await? {
            if let ServerEvent::Response(response) = event {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// Writing side of a client connection.
///
/// Holds the bearer token from the last `auth_success` and attaches it to
/// requests that don't carry one.
pub struct ClientSender {
    sender: SessionSender,
    token: RwLock<Option<String>>,
}

impl ClientSender {
    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    pub async fn set_token(&self, token: String) {
        *self.token.write().await = Some(token);
    }

    /// Send a request with the stored token attached
    pub async fn send(&self, request: Request) -> Result<()> {
        let envelope = RequestEnvelope {
            token: self.token().await,
            request,
        };
        self.send_envelope(&envelope).await
    }

    pub async fn send_envelope(&self, envelope: &RequestEnvelope) -> Result<()> {
        self.sender
            .send(envelope)
            .await
            .context("Failed to send request")
    }

    pub async fn close(&self) -> Result<()> {
        self.sender
            .shutdown()
            .await
            .context("Failed to close connection")
    }
}

/// Connect over TCP and complete the handshake
pub async fn connect(addr: &str) -> Result<(ClientSender, ClientReceiver)> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;
    tracing::info!("Connected to {}", addr);

    let (read_half, write_half) = stream.into_split();
    handshake(read_half, write_half).await
}

/// Run the handshake over an already-open byte stream
pub async fn handshake(
    read: impl AsyncRead + Unpin + Send + 'static,
    write: impl AsyncWrite + Unpin + Send + 'static,
) -> Result<(ClientSender, ClientReceiver)> {
    let mut reader = FrameReader::new(BufReader::new(read));
    let sender = SessionSender::new(FrameWriter::new(write));

    client_handshake(&mut reader, &sender)
        .await
        .context("Handshake failed")?;
    tracing::debug!("Session encrypted");

    Ok((
        ClientSender {
            sender,
            token: RwLock::new(None),
        },
        ClientReceiver { reader },
    ))
}
