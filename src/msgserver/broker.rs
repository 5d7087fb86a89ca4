// Presence directory and direct message delivery

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ChatError;
use crate::msgserver::message::{
    HistoryEntry, IncomingMessage, ResponseAction, ServerResponse, UserSummary,
};
use crate::msgserver::session::SessionContext;
use crate::msgserver::storage::Store;
use crate::msgserver::transport::SessionSender;

/// Where an online user can be reached.
///
/// The directory does not own the session; it only holds a handle to its
/// writer plus the session id used to match removals.
#[derive(Clone)]
pub struct PresenceEntry {
    pub session_id: Uuid,
    pub sender: SessionSender,
}

/// Index from authenticated user id to that user's live connection
#[derive(Default)]
pub struct PresenceDirectory {
    entries: RwLock<HashMap<i64, PresenceEntry>>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `session` as the live connection for `user_id`.
    ///
    /// Last writer wins: an earlier connection for the same user is silently
    /// displaced.
    pub async fn register(&self, user_id: i64, session: &SessionContext) {
        let entry = PresenceEntry {
            session_id: session.id(),
            sender: session.sender().clone(),
        };

        let mut entries = self.entries.write().await;
        if let Some(previous) = entries.insert(user_id, entry) {
            if previous.session_id != session.id() {
                tracing::info!(
                    "User {} now online via session {} (displaced {})",
                    user_id,
                    session.id(),
                    previous.session_id
                );
                return;
            }
        }
        tracing::info!("User {} online via session {}", user_id, session.id());
    }

    /// Remove the entry only if it still belongs to `session_id`
    pub async fn remove_if_current(&self, user_id: i64, session_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&user_id) {
            Some(entry) if entry.session_id == session_id => {
                entries.remove(&user_id);
                tracing::info!("User {} offline", user_id);
                true
            }
            Some(_) => {
                tracing::debug!(
                    "Session {} closed but user {} has a newer session",
                    session_id,
                    user_id
                );
                false
            }
            None => false,
        }
    }

    pub async fn sender_for(&self, user_id: i64) -> Option<SessionSender> {
        let entries = self.entries.read().await;
        entries.get(&user_id).map(|entry| entry.sender.clone())
    }

    pub async fn session_for(&self, user_id: i64) -> Option<Uuid> {
        let entries = self.entries.read().await;
        entries.get(&user_id).map(|entry| entry.session_id)
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        let entries = self.entries.read().await;
        entries.contains_key(&user_id)
    }

    pub async fn online_count(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }
}

/// Outcome of `send_message`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub message_id: i64,
    pub delivered: bool,
}

/// Persists messages and pushes them to online recipients
pub struct MessageBroker {
    store: Arc<dyn Store>,
    presence: Arc<PresenceDirectory>,
}

impl MessageBroker {
    pub fn new(store: Arc<dyn Store>, presence: Arc<PresenceDirectory>) -> Self {
        Self { store, presence }
    }

    pub fn presence(&self) -> &Arc<PresenceDirectory> {
        &self.presence
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Persist a message and push it live if the receiver is online.
    ///
    /// A failed push is logged and leaves the message undelivered; it is
    /// still returned by `get_history`.
    pub async fn send_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<DeliveryReport, ChatError> {
        if self.store.find_user_by_id(receiver_id)?.is_none() {
            return Err(ChatError::NotFound(format!("User {} not found", receiver_id)));
        }
        let sender = self
            .store
            .find_user_by_id(sender_id)?
            .ok_or_else(|| ChatError::NotFound(format!("User {} not found", sender_id)))?;

        let message = self.store.insert_message(sender_id, receiver_id, content)?;
        tracing::debug!(
            "Message {} from {} to {} stored",
            message.id,
            sender_id,
            receiver_id
        );

        let Some(target) = self.presence.sender_for(receiver_id).await else {
            return Ok(DeliveryReport {
                message_id: message.id,
                delivered: false,
            });
        };

        let packet = IncomingMessage {
            sender_id,
            sender_login: sender.login,
            content: message.content.clone(),
            timestamp: message.timestamp,
        };
        let push = ServerResponse::with_payload(ResponseAction::NewMessage, &packet)
            .map_err(ChatError::internal)?;

        match target.send(&push).await {
            Ok(()) => {
                // The receiver already has it; only the flag is lost
                let delivered = match self.store.mark_delivered(message.id) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            "Message {} pushed but not marked delivered: {}",
                            message.id,
                            e
                        );
                        false
                    }
                };
                Ok(DeliveryReport {
                    message_id: message.id,
                    delivered,
                })
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to push message {} to user {}: {}",
                    message.id,
                    receiver_id,
                    e
                );
                Ok(DeliveryReport {
                    message_id: message.id,
                    delivered: false,
                })
            }
        }
    }

    /// Last `limit` messages between two users, oldest first
    pub async fn get_history(
        &self,
        requester: i64,
        counterpart: i64,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, ChatError> {
        let mut messages = self.store.messages_between(requester, counterpart, limit)?;
        messages.reverse();

        Ok(messages
            .into_iter()
            .map(|message| HistoryEntry {
                is_me: message.sender_id == requester,
                sender_id: message.sender_id,
                content: message.content,
                timestamp: message.timestamp,
            })
            .collect())
    }

    pub async fn list_users(
        &self,
        query: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<UserSummary>, ChatError> {
        let users = self.store.search_users(query, page, page_size)?;

        Ok(users
            .into_iter()
            .map(|user| UserSummary {
                id: user.id,
                login: user.login,
                username: user.username,
            })
            .collect())
    }
}
