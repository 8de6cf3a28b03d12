//! In-process session store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::SessionStore;
use crate::debate::{DebateResult, DebateSession};
use crate::error::StoreError;

/// `HashMap`-backed store for tests and single-process use.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, DebateSession>>,
    results: RwLock<HashMap<String, DebateResult>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_session(&self, session: &DebateSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        match sessions.get(&session.id) {
            Some(existing) if existing.revision >= session.revision => {
                tracing::trace!(
                    session_id = %session.id,
                    stored = existing.revision,
                    incoming = session.revision,
                    "Ignoring stale session write"
                );
            }
            _ => {
                sessions.insert(session.id.clone(), session.clone());
            }
        }
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<DebateSession, StoreError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save_result(&self, result: &DebateResult) -> Result<(), StoreError> {
        self.results
            .write()
            .entry(result.session_id.clone())
            .or_insert_with(|| result.clone());
        Ok(())
    }

    async fn load_result(&self, session_id: &str) -> Result<DebateResult, StoreError> {
        self.results
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }
}
