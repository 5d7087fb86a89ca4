// Wire types and request shapes for the action protocol

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Response kinds the server can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    Success,
    Error,
    AuthSuccess,
    UserListResult,
    NewMessage,
    MessageHistoryResult,
}

/// Every server line decrypts to one of these.
///
/// Structured results travel as a JSON string inside `data`, not as a
/// nested object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub action: ResponseAction,
    pub data: Option<String>,
}

impl ServerResponse {
    pub fn new(action: ResponseAction, data: Option<String>) -> Self {
        Self { action, data }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ResponseAction::Success, Some(message.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResponseAction::Error, Some(message.into()))
    }

    /// Encode a structured payload into `data`
    pub fn with_payload<T: Serialize>(
        action: ResponseAction,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(action, Some(serde_json::to_string(payload)?)))
    }

    /// Decode a structured payload out of `data`
    pub fn payload<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_deref()
            .and_then(|data| serde_json::from_str(data).ok())
    }
}

/// Requests a client can send. The `action` tag selects the server handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    Login(LoginRequest),
    Register(RegisterRequest),
    Message(SendMessageRequest),
    History(HistoryRequest),
    UserList(UserListRequest),
}

/// A request plus the bearer token attached by the client context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub receiver_id: i64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub target_user_id: i64,
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserListRequest {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
}

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const DEFAULT_PAGE_SIZE: i64 = 5;

fn default_history_limit() -> i64 {
    DEFAULT_HISTORY_LIMIT
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// `auth_success` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
    pub user_id: i64,
    pub login: String,
    pub username: String,
}

/// One row of a `user_list_result`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub login: String,
    pub username: String,
}

/// `new_message` push payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub sender_id: i64,
    pub sender_login: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One row of a `message_history_result`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender_id: i64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_me: bool,
}

// ========== Request shapes ==========

/// Scalar type and bounds of one request field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str { min_len: usize, max_len: Option<usize> },
    Int { min: Option<i64>, max: Option<i64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn string(name: &'static str, min_len: usize, max_len: Option<usize>) -> Self {
        Self {
            name,
            kind: FieldKind::Str { min_len, max_len },
            required: true,
        }
    }

    pub const fn int(name: &'static str, min: Option<i64>, max: Option<i64>) -> Self {
        Self {
            name,
            kind: FieldKind::Int { min, max },
            required: true,
        }
    }

    pub const fn optional(self) -> Self {
        Self {
            required: false,
            ..self
        }
    }

    fn check(&self, value: Option<&Value>, violations: &mut Vec<String>) {
        let value = match value {
            None | Some(Value::Null) => {
                if self.required {
                    violations.push(format!("{}: field required", self.name));
                }
                return;
            }
            Some(value) => value,
        };

        match self.kind {
            FieldKind::Str { min_len, max_len } => {
                let Some(text) = value.as_str() else {
                    violations.push(format!("{}: expected string", self.name));
                    return;
                };
                let len = text.chars().count();
                if len < min_len {
                    violations.push(format!(
                        "{}: must be at least {} characters",
                        self.name, min_len
                    ));
                }
                if let Some(max_len) = max_len {
                    if len > max_len {
                        violations.push(format!(
                            "{}: must be at most {} characters",
                            self.name, max_len
                        ));
                    }
                }
            }
            FieldKind::Int { min, max } => {
                let Some(number) = value.as_i64() else {
                    violations.push(format!("{}: expected integer", self.name));
                    return;
                };
                if let Some(min) = min {
                    if number < min {
                        violations.push(format!("{}: must be >= {}", self.name, min));
                    }
                }
                if let Some(max) = max {
                    if number > max {
                        violations.push(format!("{}: must be <= {}", self.name, max));
                    }
                }
            }
        }
    }
}

/// Declared fields of a request. Unknown fields are ignored.
pub type RequestShape = &'static [FieldSpec];

pub const LOGIN_SHAPE: RequestShape = &[
    FieldSpec::string("login", 3, Some(20)),
    FieldSpec::string("password_hash", 20, None),
];

pub const REGISTER_SHAPE: RequestShape = &[
    FieldSpec::string("login", 3, Some(20)),
    FieldSpec::string("username", 3, Some(50)),
    FieldSpec::string("password_hash", 20, None),
];

pub const MESSAGE_SHAPE: RequestShape = &[
    FieldSpec::int("receiver_id", None, None),
    FieldSpec::string("content", 0, None),
];

pub const HISTORY_SHAPE: RequestShape = &[
    FieldSpec::int("target_user_id", None, None),
    FieldSpec::int("limit", Some(1), Some(500)).optional(),
];

pub const USER_LIST_SHAPE: RequestShape = &[
    FieldSpec::int("page", Some(1), None).optional(),
    FieldSpec::int("page_size", Some(1), Some(100)).optional(),
    FieldSpec::string("search_query", 0, Some(100)).optional(),
];

/// Check a raw document against a shape, listing every violated field
pub fn validate_shape(raw: &Value, shape: RequestShape) -> Result<(), ProtocolError> {
    let Some(object) = raw.as_object() else {
        return Err(ProtocolError::PacketValidation(vec![
            "request must be a JSON object".to_string(),
        ]));
    };

    let mut violations = Vec::new();
    for field in shape {
        field.check(object.get(field.name), &mut violations);
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::PacketValidation(violations))
    }
}

/// Deserialize a request that already passed shape validation
pub fn parse_request<T: DeserializeOwned>(raw: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(raw).map_err(|e| ProtocolError::PacketValidation(vec![e.to_string()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_wire_format() {
        let response = ServerResponse::success("Message sent");
        let text = serde_json::to_string(&response).unwrap();
        assert_eq!(text, r#"{"action":"success","data":"Message sent"}"#);

        let response = ServerResponse::new(ResponseAction::MessageHistoryResult, None);
        let text = serde_json::to_string(&response).unwrap();
        assert_eq!(text, r#"{"action":"message_history_result","data":null}"#);
    }

    #[test]
    fn test_payload_is_double_encoded() {
        let users = vec![UserSummary {
            id: 1,
            login: "alice".to_string(),
            username: "Alice".to_string(),
        }];
        let response = ServerResponse::with_payload(ResponseAction::UserListResult, &users).unwrap();

        let value = serde_json::to_value(&response).unwrap();
        assert!(value["data"].is_string());

        let decoded: Vec<UserSummary> = response.payload().unwrap();
        assert_eq!(decoded, users);
    }

    #[test]
    fn test_request_envelope_serialization() {
        let envelope = RequestEnvelope {
            token: Some("abc".to_string()),
            request: Request::Message(SendMessageRequest {
                receiver_id: 2,
                content: "hi".to_string(),
            }),
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"action": "message", "token": "abc", "receiver_id": 2, "content": "hi"})
        );

        let envelope = RequestEnvelope {
            token: None,
            request: Request::UserList(UserListRequest {
                page: 1,
                page_size: 5,
                search_query: None,
            }),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value, json!({"action": "user_list", "page": 1, "page_size": 5}));
    }

    #[test]
    fn test_validate_shape_accepts_valid_login() {
        let raw = json!({"action": "login", "login": "alice", "password_hash": "x".repeat(64)});
        assert!(validate_shape(&raw, LOGIN_SHAPE).is_ok());

        let request: LoginRequest = parse_request(raw).unwrap();
        assert_eq!(request.login, "alice");
    }

    #[test]
    fn test_validate_shape_lists_every_violation() {
        let raw = json!({"action": "register", "login": "al", "username": 7});

        let err = validate_shape(&raw, REGISTER_SHAPE).unwrap_err();
        let ProtocolError::PacketValidation(violations) = err else {
            panic!("expected validation error");
        };

        assert_eq!(violations.len(), 3);
        assert!(violations[0].starts_with("login"));
        assert!(violations[1].starts_with("username: expected string"));
        assert!(violations[2].starts_with("password_hash: field required"));
    }

    #[test]
    fn test_optional_fields_and_defaults() {
        let raw = json!({"action": "user_list"});
        assert!(validate_shape(&raw, USER_LIST_SHAPE).is_ok());

        let request: UserListRequest = parse_request(raw).unwrap();
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, DEFAULT_PAGE_SIZE);
        assert!(request.search_query.is_none());

        let raw = json!({"action": "user_list", "page": 0, "search_query": null});
        assert!(validate_shape(&raw, USER_LIST_SHAPE).is_err());

        let raw = json!({"action": "history", "target_user_id": 3});
        let request: HistoryRequest = parse_request(raw).unwrap();
        assert_eq!(request.limit, DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn test_validate_shape_rejects_non_object() {
        assert!(validate_shape(&json!([1, 2]), MESSAGE_SHAPE).is_err());
    }
}
