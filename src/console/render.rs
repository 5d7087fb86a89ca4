// Turn server events into console lines

use std::fmt;

use crate::msgserver::client::ServerEvent;
use crate::msgserver::message::{
    AuthPayload, HistoryEntry, IncomingMessage, ResponseAction, ServerResponse, UserSummary,
};

pub const PARSE_ERROR_NOTICE: &str = "Could not parse server response";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Info,
    Success,
    Error,
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub tone: Tone,
    pub text: String,
}

impl ConsoleLine {
    pub fn new(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            tone,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Tone::Info, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Tone::Error, text)
    }
}

impl fmt::Display for ConsoleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tone {
            Tone::Info => write!(f, "{}", self.text),
            Tone::Success => write!(f, "✓ {}", self.text),
            Tone::Error => write!(f, "✗ {}", self.text),
            Tone::Incoming => write!(f, "✉ {}", self.text),
        }
    }
}

pub fn render_event(event: &ServerEvent) -> Vec<ConsoleLine> {
    match event {
        ServerEvent::Response(response) => render_response(response),
        ServerEvent::Unparseable(_) => vec![ConsoleLine::error(PARSE_ERROR_NOTICE)],
    }
}

pub fn render_response(response: &ServerResponse) -> Vec<ConsoleLine> {
    let data = response.data.as_deref();
    match response.action {
        ResponseAction::Success => vec![ConsoleLine::new(Tone::Success, data.unwrap_or("OK"))],
        ResponseAction::Error => vec![ConsoleLine::error(data.unwrap_or("Unknown error"))],
        ResponseAction::AuthSuccess => match response.payload::<AuthPayload>() {
            Some(auth) => vec![ConsoleLine::new(
                Tone::Success,
                format!(
                    "Logged in as {} ({}), user id {}",
                    auth.username, auth.login, auth.user_id
                ),
            )],
            None => vec![ConsoleLine::error(PARSE_ERROR_NOTICE)],
        },
        ResponseAction::UserListResult => match response.payload::<Vec<UserSummary>>() {
            Some(users) => render_users(&users),
            None => vec![ConsoleLine::error(PARSE_ERROR_NOTICE)],
        },
        ResponseAction::NewMessage => match response.payload::<IncomingMessage>() {
            Some(message) => vec![ConsoleLine::new(
                Tone::Incoming,
                format!(
                    "[{}] {} (#{}): {}",
                    message.timestamp.format("%H:%M"),
                    message.sender_login,
                    message.sender_id,
                    message.content
                ),
            )],
            None => vec![ConsoleLine::error(PARSE_ERROR_NOTICE)],
        },
        ResponseAction::MessageHistoryResult => match response.payload::<Vec<HistoryEntry>>() {
            Some(entries) => render_history(&entries),
            None => vec![ConsoleLine::error(PARSE_ERROR_NOTICE)],
        },
    }
}

fn render_users(users: &[UserSummary]) -> Vec<ConsoleLine> {
    if users.is_empty() {
        return vec![ConsoleLine::info("No users found")];
    }

    let mut lines = vec![ConsoleLine::info("Users:")];
    lines.extend(users.iter().map(|user| {
        ConsoleLine::info(format!("  [{}] {} ({})", user.id, user.login, user.username))
    }));
    lines
}

fn render_history(entries: &[HistoryEntry]) -> Vec<ConsoleLine> {
    if entries.is_empty() {
        return vec![ConsoleLine::info("No messages yet")];
    }

    entries
        .iter()
        .map(|entry| {
            let who = if entry.is_me {
                "me".to_string()
            } else {
                format!("#{}", entry.sender_id)
            };
            ConsoleLine::info(format!(
                "[{}] {}: {}",
                entry.timestamp.format("%Y-%m-%d %H:%M"),
                who,
                entry.content
            ))
        })
        .collect()
}
