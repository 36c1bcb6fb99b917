use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::db::Database;
use crate::metrics::Metrics;
use crate::models::Session;

/// Durable home of session records. Writes are idempotent upserts keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_checkpoint(&self, session: &Session) -> Result<()>;

    /// Terminal write. User and global totals move only the first time a session
    /// is finalized.
    async fn save_final(&self, session: &Session, metrics: &Metrics) -> Result<()>;

    /// Latest running session of `user_id` checkpointed within `max_age`.
    async fn find_open_session(&self, user_id: &str, max_age: Duration) -> Result<Option<Session>>;

    /// Running sessions whose last checkpoint is older than `max_age`.
    async fn find_stale_sessions(&self, max_age: Duration) -> Result<Vec<Session>>;
}

#[async_trait]
impl SessionStore for Database {
    async fn save_checkpoint(&self, session: &Session) -> Result<()> {
        self.save_session(session).await?;
        Ok(())
    }

    async fn save_final(&self, session: &Session, metrics: &Metrics) -> Result<()> {
        self.finalize_session(session, metrics).await?;
        Ok(())
    }

    async fn find_open_session(&self, user_id: &str, max_age: Duration) -> Result<Option<Session>> {
        Database::find_open_session(self, user_id, Utc::now() - max_age).await
    }

    async fn find_stale_sessions(&self, max_age: Duration) -> Result<Vec<Session>> {
        Database::find_stale_sessions(self, Utc::now() - max_age).await
    }
}
