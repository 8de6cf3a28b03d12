//! Session and result persistence.
//!
//! Every session write carries the session's `revision`; stores keep the
//! highest revision they have seen and ignore older writes, so out-of-order
//! saves from concurrent commands cannot roll a session back.
//!
//! ```rust,ignore
//! use consensus_forge::storage::{SessionStore, SqliteSessionStore};
//!
//! let store = SqliteSessionStore::open("debates.db").await?;
//! store.save_session(&session).await?;
//! let loaded = store.load_session(&session.id).await?;
//! ```

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::debate::{DebateResult, DebateSession};
use crate::error::StoreError;

pub use memory::InMemorySessionStore;
pub use sqlite::SqliteSessionStore;

/// Persistence for debate sessions and their terminal results.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Upsert a session unless a newer revision is already stored.
    async fn save_session(&self, session: &DebateSession) -> Result<(), StoreError>;

    async fn load_session(&self, id: &str) -> Result<DebateSession, StoreError>;

    /// Store the result of a finished session. Results are written once.
    async fn save_result(&self, result: &DebateResult) -> Result<(), StoreError>;

    async fn load_result(&self, session_id: &str) -> Result<DebateResult, StoreError>;
}
