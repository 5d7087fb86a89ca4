// Per-connection state

use std::net::SocketAddr;
use uuid::Uuid;

use crate::error::TransportError;
use crate::msgserver::message::ServerResponse;
use crate::msgserver::transport::SessionSender;

/// State of one accepted connection, from accept to disconnect.
///
/// The session cipher lives in the transport halves; `sender` writes through
/// it once the handshake has installed it.
pub struct SessionContext {
    id: Uuid,
    peer: Option<SocketAddr>,
    sender: SessionSender,
    user_id: Option<i64>,
    online_as: Option<i64>,
}

impl SessionContext {
    pub fn new(peer: Option<SocketAddr>, sender: SessionSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            sender,
            user_id: None,
            online_as: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn sender(&self) -> &SessionSender {
        &self.sender
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn set_user(&mut self, user_id: i64) {
        if let Some(previous) = self.user_id {
            if previous != user_id {
                tracing::info!(
                    "Session {} switched user {} -> {}",
                    self.id,
                    previous,
                    user_id
                );
            }
        }
        self.user_id = Some(user_id);
    }

    /// User id this session is registered under in the presence directory
    pub fn online_as(&self) -> Option<i64> {
        self.online_as
    }

    pub fn mark_online(&mut self, user_id: i64) -> Option<i64> {
        self.online_as.replace(user_id)
    }

    /// Send a reply to this peer
    pub async fn reply(&self, response: &ServerResponse) -> Result<(), TransportError> {
        self.sender.send(response).await
    }

    /// Human readable label for logs
    pub fn label(&self) -> String {
        match self.peer {
            Some(peer) => format!("{} ({})", self.id, peer),
            None => self.id.to_string(),
        }
    }
}
