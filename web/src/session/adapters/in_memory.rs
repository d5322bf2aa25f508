use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Duration;
use fixmycar_core::ChatSession;
use tracing::{debug, info};
use uuid::Uuid;

use crate::session::store::{Session, SessionStore, SessionStoreError};

/// In-memory implementation of SessionStore
#[derive(Debug)]
pub struct InMemorySessionStore {
    /// Thread-safe storage of sessions
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    idle_ttl: Duration,
}

impl InMemorySessionStore {
    /// Create a store that forgets sessions idle for longer than `idle_ttl`
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, chat: ChatSession) -> Result<Session, SessionStoreError> {
        // Idle sessions are swept when new ones arrive; there is no timer
        self.cleanup_expired_sessions().await?;

        let session = Session::new(Uuid::new_v4().to_string(), chat);

        let mut sessions = self.sessions.write().map_err(|e| {
            SessionStoreError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;

        sessions.insert(session.id.clone(), session.clone());
        debug!("Created session: {}", session.id);

        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Session, SessionStoreError> {
        let mut sessions = self.sessions.write().map_err(|e| {
            SessionStoreError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;

        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionStoreError::NotFound(id.to_string()))?;

        if session.is_idle(self.idle_ttl) {
            sessions.remove(id);
            debug!("Dropped idle session on access: {}", id);
            return Err(SessionStoreError::Expired(id.to_string()));
        }

        session.touch();
        Ok(session.clone())
    }

    async fn delete_session(&self, id: &str) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.write().map_err(|e| {
            SessionStoreError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;

        if sessions.remove(id).is_none() {
            return Err(SessionStoreError::NotFound(id.to_string()));
        }

        debug!("Deleted session: {}", id);
        Ok(())
    }

    async fn cleanup_expired_sessions(&self) -> Result<usize, SessionStoreError> {
        let mut sessions = self.sessions.write().map_err(|e| {
            SessionStoreError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;

        let before = sessions.len();
        sessions.retain(|_, session| !session.is_idle(self.idle_ttl));
        let count = before - sessions.len();

        if count > 0 {
            info!("Cleaned up {} idle sessions", count);
        }

        Ok(count)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, SessionStoreError> {
        let sessions = self.sessions.read().map_err(|e| {
            SessionStoreError::StorageError(format!("Failed to acquire read lock: {}", e))
        })?;

        let active: Vec<Session> = sessions
            .values()
            .filter(|session| !session.is_idle(self.idle_ttl))
            .cloned()
            .collect();

        debug!("Listed {} active sessions", active.len());
        Ok(active)
    }
}
