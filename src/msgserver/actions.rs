// Built-in controllers: auth, chat and user directory actions

use serde_json::Value;

use crate::error::{AuthError, ChatError};
use crate::msgserver::auth::digest_password;
use crate::msgserver::message::{
    parse_request, AuthPayload, HistoryRequest, LoginRequest, RegisterRequest, ResponseAction,
    SendMessageRequest, ServerResponse, UserListRequest, HISTORY_SHAPE, LOGIN_SHAPE,
    MESSAGE_SHAPE, REGISTER_SHAPE, USER_LIST_SHAPE,
};
use crate::msgserver::router::{ActionDescriptor, ActionFuture, ServerState};
use crate::msgserver::session::SessionContext;
use crate::msgserver::storage::User;

pub const AUTH_ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        name: "login",
        handler: login,
        shape: LOGIN_SHAPE,
        requires_auth: false,
    },
    ActionDescriptor {
        name: "register",
        handler: register,
        shape: REGISTER_SHAPE,
        requires_auth: false,
    },
];

pub const CHAT_ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        name: "message",
        handler: message,
        shape: MESSAGE_SHAPE,
        requires_auth: true,
    },
    ActionDescriptor {
        name: "history",
        handler: history,
        shape: HISTORY_SHAPE,
        requires_auth: true,
    },
];

pub const USER_ACTIONS: &[ActionDescriptor] = &[ActionDescriptor {
    name: "user_list",
    handler: user_list,
    shape: USER_LIST_SHAPE,
    requires_auth: true,
}];

/// Every controller table registered by `ActionRegistry::with_default_actions`
pub const CONTROLLERS: &[&[ActionDescriptor]] = &[AUTH_ACTIONS, CHAT_ACTIONS, USER_ACTIONS];

fn login<'a>(state: &'a ServerState, session: &'a mut SessionContext, raw: Value) -> ActionFuture<'a> {
    Box::pin(handle_login(state, session, raw))
}

fn register<'a>(
    state: &'a ServerState,
    session: &'a mut SessionContext,
    raw: Value,
) -> ActionFuture<'a> {
    Box::pin(handle_register(state, session, raw))
}

fn message<'a>(
    state: &'a ServerState,
    session: &'a mut SessionContext,
    raw: Value,
) -> ActionFuture<'a> {
    Box::pin(handle_message(state, session, raw))
}

fn history<'a>(
    state: &'a ServerState,
    session: &'a mut SessionContext,
    raw: Value,
) -> ActionFuture<'a> {
    Box::pin(handle_history(state, session, raw))
}

fn user_list<'a>(
    state: &'a ServerState,
    session: &'a mut SessionContext,
    raw: Value,
) -> ActionFuture<'a> {
    Box::pin(handle_user_list(state, session, raw))
}

async fn handle_login(
    state: &ServerState,
    session: &mut SessionContext,
    raw: Value,
) -> Result<ServerResponse, ChatError> {
    let request: LoginRequest = parse_request(raw)?;

    let digest = digest_password(&request.password_hash);
    let user = state
        .store()
        .find_user_by_login(&request.login)?
        .filter(|user| user.password_hash == digest)
        .ok_or(AuthError::BadCredentials)?;

    tracing::info!("User {} ({}) logged in", user.id, user.login);
    authenticated(state, session, user).await
}

async fn handle_register(
    state: &ServerState,
    session: &mut SessionContext,
    raw: Value,
) -> Result<ServerResponse, ChatError> {
    let request: RegisterRequest = parse_request(raw)?;

    let user = state.store().create_user(
        &request.login,
        &request.username,
        &digest_password(&request.password_hash),
    )?;

    tracing::info!("Registered user {} ({})", user.id, user.login);
    authenticated(state, session, user).await
}

/// Issue a token, bind the session to `user` and announce it as online
async fn authenticated(
    state: &ServerState,
    session: &mut SessionContext,
    user: User,
) -> Result<ServerResponse, ChatError> {
    let token = state.tokens.issue(user.id, &user.username)?;

    session.set_user(user.id);
    if let Some(previous) = session.mark_online(user.id) {
        if previous != user.id {
            state
                .presence()
                .remove_if_current(previous, session.id())
                .await;
        }
    }
    state.presence().register(user.id, session).await;

    let payload = AuthPayload {
        token,
        user_id: user.id,
        login: user.login,
        username: user.username,
    };
    ServerResponse::with_payload(ResponseAction::AuthSuccess, &payload).map_err(ChatError::internal)
}

fn current_user(session: &SessionContext) -> Result<i64, ChatError> {
    session
        .user_id()
        .ok_or(ChatError::Unauthorized(AuthError::MissingToken))
}

async fn handle_message(
    state: &ServerState,
    session: &mut SessionContext,
    raw: Value,
) -> Result<ServerResponse, ChatError> {
    let sender_id = current_user(session)?;
    let request: SendMessageRequest = parse_request(raw)?;

    let report = state
        .broker
        .send_message(sender_id, request.receiver_id, &request.content)
        .await?;

    tracing::debug!(
        "Message {} from {} to {} (delivered: {})",
        report.message_id,
        sender_id,
        request.receiver_id,
        report.delivered
    );
    Ok(ServerResponse::success("Message sent"))
}

async fn handle_history(
    state: &ServerState,
    session: &mut SessionContext,
    raw: Value,
) -> Result<ServerResponse, ChatError> {
    let requester = current_user(session)?;
    let request: HistoryRequest = parse_request(raw)?;

    // Shape validation bounds the limit to 1..=500
    let limit = usize::try_from(request.limit).map_err(ChatError::internal)?;
    let entries = state
        .broker
        .get_history(requester, request.target_user_id, limit)
        .await?;

    ServerResponse::with_payload(ResponseAction::MessageHistoryResult, &entries)
        .map_err(ChatError::internal)
}

async fn handle_user_list(
    state: &ServerState,
    session: &mut SessionContext,
    raw: Value,
) -> Result<ServerResponse, ChatError> {
    current_user(session)?;
    let request: UserListRequest = parse_request(raw)?;

    let page = usize::try_from(request.page).map_err(ChatError::internal)?;
    let page_size = usize::try_from(request.page_size).map_err(ChatError::internal)?;
    let query = request
        .search_query
        .as_deref()
        .map(str::trim)
        .filter(|query| !query.is_empty());

    let users = state.broker.list_users(query, page, page_size).await?;

    ServerResponse::with_payload(ResponseAction::UserListResult, &users)
        .map_err(ChatError::internal)
}
