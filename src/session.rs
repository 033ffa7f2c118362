//! Chat stream session cache
//!
//! One in-flight streamed reply per user, parked in the key-value cache so
//! a stateless polling endpoint can catch up after its own request cycle
//! ended. The background stream task is the only writer for a given user's
//! key; pollers only read, so a full overwrite per delta is safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cache::{self, KvCache};
use crate::error::{PolychatError, Result};

/// Cache-resident record of one in-progress streamed chat reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStreamSession {
    pub owner_user_id: i64,
    pub dialog_id: i64,
    /// Append-only until `ended` is set
    pub content: String,
    pub started_at_ms: i64,
    pub ended: bool,
    /// Persisted message id, assigned at finish when content is non-empty
    pub message_id: Option<i64>,
    /// Mid-stream failure; pollers must not treat partial content as success
    pub error: Option<String>,
}

impl ChatStreamSession {
    #[must_use]
    pub fn new(owner_user_id: i64, dialog_id: i64) -> Self {
        Self {
            owner_user_id,
            dialog_id,
            content: String::new(),
            started_at_ms: Utc::now().timestamp_millis(),
            ended: false,
            message_id: None,
            error: None,
        }
    }

    /// Session age exceeds the TTL; treated as absent
    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let age_ms = Utc::now().timestamp_millis() - self.started_at_ms;
        age_ms >= i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Session accessor over the key-value cache
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn KvCache>,
    ttl: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(cache: Arc<dyn KvCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn key(user_id: i64) -> String {
        format!("chat:stream:{user_id}")
    }

    /// Begin a new session for a user
    ///
    /// # Errors
    ///
    /// `SessionConflict` if a live session exists (not ended, not past TTL).
    pub async fn begin(&self, user_id: i64, dialog_id: i64) -> Result<ChatStreamSession> {
        if let Some(existing) = self.poll(user_id).await? {
            if !existing.ended && !existing.is_expired(self.ttl) {
                return Err(PolychatError::SessionConflict { user_id });
            }
        }

        let session = ChatStreamSession::new(user_id, dialog_id);
        self.write(&session).await?;
        Ok(session)
    }

    /// Append a content delta and overwrite the cached session
    pub async fn append_delta(
        &self,
        session: &mut ChatStreamSession,
        delta: &str,
    ) -> Result<()> {
        session.content.push_str(delta);
        self.write(session).await
    }

    /// Mark the session ended with an optional persisted message id
    pub async fn finish(
        &self,
        session: &mut ChatStreamSession,
        message_id: Option<i64>,
    ) -> Result<()> {
        session.ended = true;
        session.message_id = message_id;
        self.write(session).await
    }

    /// Record a mid-stream error and end the session
    pub async fn fail(&self, session: &mut ChatStreamSession, error: String) -> Result<()> {
        session.error = Some(error);
        session.ended = true;
        self.write(session).await
    }

    /// Read the current session, if any (TTL enforced at read)
    pub async fn poll(&self, user_id: i64) -> Result<Option<ChatStreamSession>> {
        let session: Option<ChatStreamSession> =
            cache::get_json(self.cache.as_ref(), &Self::key(user_id)).await?;
        Ok(session.filter(|s| !s.is_expired(self.ttl)))
    }

    /// Drop the session record
    pub async fn clear(&self, user_id: i64) -> Result<()> {
        self.cache.delete(&Self::key(user_id)).await
    }

    async fn write(&self, session: &ChatStreamSession) -> Result<()> {
        cache::set_json(
            self.cache.as_ref(),
            &Self::key(session.owner_user_id),
            session,
            Some(self.ttl),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use pretty_assertions::assert_eq;

    fn store(ttl: Duration) -> SessionStore {
        SessionStore::new(Arc::new(MemoryCache::new()), ttl)
    }

    #[tokio::test]
    async fn test_second_session_conflicts_while_live() {
        let store = store(Duration::from_secs(180));
        store.begin(7, 1).await.unwrap();

        let err = store.begin(7, 2).await.unwrap_err();
        assert!(matches!(
            err,
            PolychatError::SessionConflict { user_id: 7 }
        ));
    }

    #[tokio::test]
    async fn test_begin_allowed_after_previous_ended() {
        let store = store(Duration::from_secs(180));
        let mut first = store.begin(7, 1).await.unwrap();
        store.finish(&mut first, Some(42)).await.unwrap();

        assert!(store.begin(7, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_begin_allowed_after_ttl_expiry() {
        let store = store(Duration::from_millis(20));
        store.begin(7, 1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.begin(7, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_session_invisible_to_pollers() {
        let store = store(Duration::from_millis(20));
        store.begin(7, 1).await.unwrap();
        assert!(store.poll(7).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.poll(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_appended_content_visible_to_pollers() {
        let store = store(Duration::from_secs(180));
        let mut session = store.begin(7, 1).await.unwrap();

        store.append_delta(&mut session, "Hello").await.unwrap();
        store.append_delta(&mut session, " world").await.unwrap();

        let seen = store.poll(7).await.unwrap().unwrap();
        assert_eq!(seen.content, "Hello world");
        assert!(!seen.ended);
    }

    #[tokio::test]
    async fn test_failed_session_carries_error() {
        let store = store(Duration::from_secs(180));
        let mut session = store.begin(7, 1).await.unwrap();
        store.append_delta(&mut session, "partial").await.unwrap();
        store
            .fail(&mut session, "upstream hung up".to_string())
            .await
            .unwrap();

        let seen = store.poll(7).await.unwrap().unwrap();
        assert!(seen.ended);
        assert_eq!(seen.error.as_deref(), Some("upstream hung up"));
        assert_eq!(seen.content, "partial");
        assert!(seen.message_id.is_none());
    }

    #[tokio::test]
    async fn test_sessions_are_per_user() {
        let store = store(Duration::from_secs(180));
        store.begin(1, 10).await.unwrap();
        // A different user is unaffected
        assert!(store.begin(2, 20).await.is_ok());
    }
}
