// Persistent state using SQLite

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub username: String,
    pub password_hash: String,
}

/// A persisted direct message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub delivered: bool,
}

/// Persistence interface used by the action handlers
pub trait Store: Send + Sync {
    /// Fails with `StoreError::Conflict` if the login is taken
    fn create_user(&self, login: &str, username: &str, password_hash: &str)
        -> Result<User, StoreError>;

    fn find_user_by_login(&self, login: &str) -> Result<Option<User>, StoreError>;

    fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    /// Stores a message with `delivered = false`
    fn insert_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    fn mark_delivered(&self, message_id: i64) -> Result<(), StoreError>;

    fn find_message(&self, message_id: i64) -> Result<Option<StoredMessage>, StoreError>;

    /// Most recent first
    fn messages_between(&self, a: i64, b: i64, limit: usize)
        -> Result<Vec<StoredMessage>, StoreError>;

    /// Pages are 1-based
    fn search_users(
        &self,
        query: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<User>, StoreError>;
}

/// `Store` over a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory database, used by tests and `--database :memory:`
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_db()?;
        Ok(store)
    }

    /// The connection stays usable after a panic elsewhere; SQLite rolls
    /// back any statement that did not complete.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize database schema
    fn initialize_db(&self) -> Result<(), StoreError> {
        let conn = self.lock();

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                login TEXT UNIQUE NOT NULL,
                username TEXT NOT NULL,
                password_hash TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id INTEGER NOT NULL,
                receiver_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (sender_id) REFERENCES users(id),
                FOREIGN KEY (receiver_id) REFERENCES users(id)
            );

            CREATE INDEX IF NOT EXISTS idx_users_login ON users(login);
            CREATE INDEX IF NOT EXISTS idx_messages_pair
                ON messages(sender_id, receiver_id, timestamp);",
        )?;

        Ok(())
    }

    fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            login: row.get(1)?,
            username: row.get(2)?,
            password_hash: row.get(3)?,
        })
    }

    fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
        let millis: i64 = row.get(4)?;
        Ok(StoredMessage {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            receiver_id: row.get(2)?,
            content: row.get(3)?,
            timestamp: Utc
                .timestamp_millis_opt(millis)
                .single()
                .unwrap_or_default(),
            delivered: row.get(5)?,
        })
    }
}

impl Store for SqliteStore {
    fn create_user(
        &self,
        login: &str,
        username: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let conn = self.lock();

        let result = conn.execute(
            "INSERT INTO users (login, username, password_hash) VALUES (?1, ?2, ?3)",
            params![login, username, password_hash],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Conflict(format!(
                    "Login '{}' is already taken",
                    login
                )));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(User {
            id: conn.last_insert_rowid(),
            login: login.to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        })
    }

    fn find_user_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let conn = self.lock();

        let user = conn
            .query_row(
                "SELECT id, login, username, password_hash FROM users WHERE login = ?1",
                params![login],
                Self::user_from_row,
            )
            .optional()?;

        Ok(user)
    }

    fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let conn = self.lock();

        let user = conn
            .query_row(
                "SELECT id, login, username, password_hash FROM users WHERE id = ?1",
                params![id],
                Self::user_from_row,
            )
            .optional()?;

        Ok(user)
    }

    fn insert_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let conn = self.lock();
        let timestamp = Utc::now();

        conn.execute(
            "INSERT INTO messages (sender_id, receiver_id, content, timestamp, delivered)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![sender_id, receiver_id, content, timestamp.timestamp_millis()],
        )?;

        Ok(StoredMessage {
            id: conn.last_insert_rowid(),
            sender_id,
            receiver_id,
            content: content.to_string(),
            timestamp,
            delivered: false,
        })
    }

    fn mark_delivered(&self, message_id: i64) -> Result<(), StoreError> {
        let conn = self.lock();

        conn.execute(
            "UPDATE messages SET delivered = 1 WHERE id = ?1",
            params![message_id],
        )?;

        Ok(())
    }

    fn find_message(&self, message_id: i64) -> Result<Option<StoredMessage>, StoreError> {
        let conn = self.lock();

        let message = conn
            .query_row(
                "SELECT id, sender_id, receiver_id, content, timestamp, delivered
                 FROM messages WHERE id = ?1",
                params![message_id],
                Self::message_from_row,
            )
            .optional()?;

        Ok(message)
    }

    fn messages_between(
        &self,
        a: i64,
        b: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.lock();

        let mut stmt = conn.prepare(
            "SELECT id, sender_id, receiver_id, content, timestamp, delivered
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY timestamp DESC, id DESC
             LIMIT ?3",
        )?;

        let messages = stmt
            .query_map(params![a, b, limit as i64], Self::message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    fn search_users(
        &self,
        query: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<User>, StoreError> {
        // A page past the addressable range is simply empty
        let Some(offset) = (page.max(1) - 1)
            .checked_mul(page_size)
            .and_then(|offset| i64::try_from(offset).ok())
        else {
            return Ok(Vec::new());
        };
        let conn = self.lock();

        let users = match query.filter(|q| !q.is_empty()) {
            Some(query) => {
                let pattern = format!("%{}%", query);
                let mut stmt = conn.prepare(
                    "SELECT id, login, username, password_hash FROM users
                     WHERE login LIKE ?1 OR username LIKE ?1
                     ORDER BY id LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt
                    .query_map(
                        params![pattern, page_size as i64, offset],
                        Self::user_from_row,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, login, username, password_hash FROM users
                     ORDER BY id LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt
                    .query_map(
                        params![page_size as i64, offset],
                        Self::user_from_row,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok(users)
    }
}
