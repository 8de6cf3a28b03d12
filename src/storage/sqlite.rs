//! SQLite-backed session store.
//!
//! Sessions and results are stored as JSON documents next to a few indexed
//! columns. The upsert only replaces a row when the incoming revision is
//! newer.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use super::SessionStore;
use crate::debate::{DebateResult, DebateSession};
use crate::error::StoreError;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS debate_sessions (
    id              TEXT    PRIMARY KEY,
    debate_id       TEXT    NOT NULL,
    state           TEXT    NOT NULL,
    current_round   INTEGER NOT NULL,
    revision        INTEGER NOT NULL,
    body            TEXT    NOT NULL,
    updated_at      TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_debate_sessions_debate ON debate_sessions(debate_id);
CREATE INDEX IF NOT EXISTS idx_debate_sessions_state ON debate_sessions(state);

CREATE TABLE IF NOT EXISTS debate_results (
    session_id      TEXT    PRIMARY KEY,
    status          TEXT    NOT NULL,
    total_cost_usd  REAL    NOT NULL,
    total_rounds    INTEGER NOT NULL,
    body            TEXT    NOT NULL,
    completed_at    TEXT    NOT NULL
);
"#;

#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (or create) a database file, or a `sqlite:` URL.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite://{}", path)
        };
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        Self::init(pool, path).await
    }

    /// A private in-memory database; a single connection keeps it alive.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Self::init(pool, ":memory:").await
    }

    async fn init(pool: SqlitePool, path: &str) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        tracing::info!(path = path, "Session store opened");
        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save_session(&self, session: &DebateSession) -> Result<(), StoreError> {
        let body = serde_json::to_string(session)?;
        sqlx::query(
            r#"INSERT INTO debate_sessions
                   (id, debate_id, state, current_round, revision, body, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(id) DO UPDATE SET
                   state = excluded.state,
                   current_round = excluded.current_round,
                   revision = excluded.revision,
                   body = excluded.body,
                   updated_at = excluded.updated_at
               WHERE excluded.revision > debate_sessions.revision"#,
        )
        .bind(&session.id)
        .bind(&session.debate_id)
        .bind(session.state.as_str())
        .bind(session.current_round as i64)
        .bind(session.revision as i64)
        .bind(body)
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<DebateSession, StoreError> {
        let row = sqlx::query("SELECT body FROM debate_sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let body: String = row.get("body");
        Ok(serde_json::from_str(&body)?)
    }

    async fn save_result(&self, result: &DebateResult) -> Result<(), StoreError> {
        let body = serde_json::to_string(result)?;
        sqlx::query(
            r#"INSERT OR IGNORE INTO debate_results
                   (session_id, status, total_cost_usd, total_rounds, body, completed_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        )
        .bind(&result.session_id)
        .bind(result.status.as_str())
        .bind(result.total_cost_usd)
        .bind(result.total_rounds as i64)
        .bind(body)
        .bind(result.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_result(&self, session_id: &str) -> Result<DebateResult, StoreError> {
        let row = sqlx::query("SELECT body FROM debate_results WHERE session_id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        let body: String = row.get("body");
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::{ContextEntry, DebateState};
    use chrono::Utc;

    #[tokio::test]
    async fn test_session_round_trip_with_revisions() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        let mut session = DebateSession::new("d1", "Which database?", 3);
        session.state = DebateState::Running;
        session.touch();
        store.save_session(&session).await.unwrap();

        let stale = session.clone();
        session.state = DebateState::Paused;
        session.pause_reason = Some("review".to_string());
        session.additional_context.push(ContextEntry {
            text: "Budget is fixed".to_string(),
            injected_at: Utc::now(),
            injected_by: "user".to_string(),
            applies_to_round: 2,
        });
        session.touch();
        store.save_session(&session).await.unwrap();
        store.save_session(&stale).await.unwrap();

        let loaded = store.load_session(&session.id).await.unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_results_and_missing_rows() {
        let store = SqliteSessionStore::in_memory().await.unwrap();
        let session = DebateSession::new("d1", "q", 3);
        let result = DebateResult::new(&session, DebateState::Completed, vec![], vec![], None);
        store.save_result(&result).await.unwrap();

        let loaded = store.load_result(&session.id).await.unwrap();
        assert_eq!(loaded.status, DebateState::Completed);
        assert!(matches!(
            store.load_session("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debates.db");
        let store = SqliteSessionStore::open(path.to_str().unwrap()).await.unwrap();
        let session = DebateSession::new("d1", "q", 3);
        store.save_session(&session).await.unwrap();
        assert_eq!(store.load_session(&session.id).await.unwrap().id, session.id);
    }
}
