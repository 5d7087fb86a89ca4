// Action registry and dispatcher
//
// Each inbound document names an action. The registry looks the action up,
// validates the document against the declared request shape, runs the auth
// guard for protected actions and then invokes the handler.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::crypto::ServerKeypair;
use crate::error::{ChatError, ProtocolError};
use crate::msgserver::auth::{authorize, TokenManager};
use crate::msgserver::broker::{MessageBroker, PresenceDirectory};
use crate::msgserver::message::{validate_shape, RequestShape, ServerResponse};
use crate::msgserver::session::SessionContext;
use crate::msgserver::storage::Store;

pub type ActionFuture<'a> = BoxFuture<'a, Result<ServerResponse, ChatError>>;

/// Handler signature. The returned response is sent back to the caller.
pub type ActionHandler =
    for<'a> fn(&'a ServerState, &'a mut SessionContext, Value) -> ActionFuture<'a>;

/// One registered action
#[derive(Clone, Copy)]
pub struct ActionDescriptor {
    pub name: &'static str,
    pub handler: ActionHandler,
    pub shape: RequestShape,
    pub requires_auth: bool,
}

impl std::fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("name", &self.name)
            .field("requires_auth", &self.requires_auth)
            .finish()
    }
}

/// Flat table of actions, filled once at startup
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, ActionDescriptor>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in controller table
    pub fn with_default_actions() -> Self {
        let mut registry = Self::new();
        for table in crate::msgserver::actions::CONTROLLERS {
            registry.register_all(table);
        }
        registry
    }

    /// Add an action. A second registration under the same name replaces the
    /// first.
    pub fn register(&mut self, descriptor: ActionDescriptor) {
        if self
            .actions
            .insert(descriptor.name.to_string(), descriptor)
            .is_some()
        {
            tracing::warn!("Action '{}' registered twice, keeping the last", descriptor.name);
        } else {
            tracing::debug!("Registered action '{}'", descriptor.name);
        }
    }

    pub fn register_all(&mut self, table: &[ActionDescriptor]) {
        for descriptor in table {
            self.register(*descriptor);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.get(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Sorted action names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Route one document and produce the reply for it.
    ///
    /// Never fails: every error, including a handler panic, becomes an
    /// `error` response.
    pub async fn dispatch(
        &self,
        state: &ServerState,
        session: &mut SessionContext,
        raw: Value,
    ) -> ServerResponse {
        let action = match raw.get("action").and_then(Value::as_str) {
            Some(action) => action.to_string(),
            None => return error_reply(session, ProtocolError::MissingAction.into()),
        };
        let Some(descriptor) = self.get(&action).copied() else {
            return error_reply(session, ProtocolError::UnknownAction(action).into());
        };

        tracing::debug!("Session {} -> {}", session.id(), action);

        if let Err(e) = validate_shape(&raw, descriptor.shape) {
            return error_reply(session, e.into());
        }
        if descriptor.requires_auth {
            if let Err(e) = authorize(&state.tokens, session, &raw) {
                return error_reply(session, e);
            }
        }

        let outcome = AssertUnwindSafe((descriptor.handler)(state, session, raw))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => error_reply(session, e),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    "Handler '{}' panicked for session {}: {}",
                    action,
                    session.id(),
                    detail
                );
                ServerResponse::error(ChatError::internal(anyhow::anyhow!(detail)).to_string())
            }
        }
    }
}

fn error_reply(session: &SessionContext, err: ChatError) -> ServerResponse {
    match &err {
        ChatError::Internal(source) => {
            tracing::error!("Internal error in session {}: {:#}", session.id(), source);
        }
        other => tracing::debug!("Session {} request rejected: {}", session.id(), other),
    }
    ServerResponse::error(err.to_string())
}

/// Everything handlers share, built once at startup
pub struct ServerState {
    pub keys: ServerKeypair,
    pub tokens: TokenManager,
    pub broker: MessageBroker,
    pub registry: ActionRegistry,
}

impl ServerState {
    pub fn new(
        keys: ServerKeypair,
        tokens: TokenManager,
        store: Arc<dyn Store>,
        registry: ActionRegistry,
    ) -> Self {
        let broker = MessageBroker::new(store, Arc::new(PresenceDirectory::new()));
        Self {
            keys,
            tokens,
            broker,
            registry,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.broker.store()
    }

    pub fn presence(&self) -> &Arc<PresenceDirectory> {
        self.broker.presence()
    }

    /// Dispatch through this state's registry
    pub async fn dispatch(&self, session: &mut SessionContext, raw: Value) -> ServerResponse {
        self.registry.dispatch(self, session, raw).await
    }
}
