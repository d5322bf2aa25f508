use std::error::Error;
use std::fmt::{Debug, Display};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fixmycar_core::{ChatSession, Turn};
use tokio::sync::{watch, Mutex};

/// The chat loop of one browser session. The mutex enforces a single
/// in-flight submission per transcript.
pub type SharedChat = Arc<Mutex<ChatSession>>;

/// Error type for session store operations
#[derive(Debug)]
pub enum SessionStoreError {
    /// Session not found
    NotFound(String),
    /// Session was dropped after sitting idle
    Expired(String),
    /// Error occurred during a store operation
    StorageError(String),
}

impl Display for SessionStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStoreError::NotFound(id) => write!(f, "Session not found: {}", id),
            SessionStoreError::Expired(id) => write!(f, "Session expired: {}", id),
            SessionStoreError::StorageError(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl Error for SessionStoreError {}

/// Session data structure
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session identifier
    pub id: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last time the session was used
    pub last_active: DateTime<Utc>,
    pub chat: SharedChat,
    /// Transcript snapshots, readable while a question is being answered
    pub history: watch::Receiver<Vec<Turn>>,
}

impl Session {
    /// Create a new session with the given ID
    pub fn new(id: String, chat: ChatSession) -> Self {
        let now = Utc::now();
        let history = chat.watch_history();
        Self {
            id,
            created_at: now,
            last_active: now,
            chat: Arc::new(Mutex::new(chat)),
            history,
        }
    }

    /// Record activity on this session
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    /// Check if the session has been idle for longer than `ttl`
    pub fn is_idle(&self, ttl: Duration) -> bool {
        Utc::now() - self.last_active > ttl
    }
}

/// Trait defining the interface for session stores
#[async_trait]
pub trait SessionStore: Send + Sync + Debug {
    /// Register a new session around the given chat loop
    async fn create_session(&self, chat: ChatSession) -> Result<Session, SessionStoreError>;

    /// Get a session by ID, marking it active
    async fn get_session(&self, id: &str) -> Result<Session, SessionStoreError>;

    /// Delete a session by ID
    async fn delete_session(&self, id: &str) -> Result<(), SessionStoreError>;

    /// Delete idle sessions
    async fn cleanup_expired_sessions(&self) -> Result<usize, SessionStoreError>;

    /// List all live sessions
    async fn list_sessions(&self) -> Result<Vec<Session>, SessionStoreError>;
}

/// Type alias for Arc-wrapped SessionStore trait objects
pub type SessionStoreRef = Arc<dyn SessionStore>;
