//! Session control: the single writer of a running debate's session.
//!
//! External commands and the debate loop both go through [`SessionControl`].
//! Each write happens under one lock, bumps the revision, and is then
//! persisted and published. Pause and force requests reach the loop through
//! a watch channel and a cancellation token, so they take effect at the next
//! round boundary (force also abandons the in-flight round).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::{DebateError, EngineResult};
use super::events::{DebateEvent, EventBus};
use super::types::{ContextEntry, DebateSession, DebateState};
use crate::storage::SessionStore;

struct ControlInner {
    session: Mutex<DebateSession>,
    paused: watch::Sender<bool>,
    force: CancellationToken,
    /// Highest round whose prompts have been built.
    rounds_started: AtomicU32,
    store: Arc<dyn SessionStore>,
    events: EventBus,
}

/// Cloneable handle over one debate session.
#[derive(Clone)]
pub struct SessionControl {
    inner: Arc<ControlInner>,
}

impl SessionControl {
    pub fn new(session: DebateSession, store: Arc<dyn SessionStore>, events: EventBus) -> Self {
        let (paused, _) = watch::channel(session.state == DebateState::Paused);
        Self {
            inner: Arc::new(ControlInner {
                session: Mutex::new(session),
                paused,
                force: CancellationToken::new(),
                rounds_started: AtomicU32::new(0),
                store,
                events,
            }),
        }
    }

    pub fn id(&self) -> String {
        self.inner.session.lock().id.clone()
    }

    /// Current session snapshot.
    pub fn snapshot(&self) -> DebateSession {
        self.inner.session.lock().clone()
    }

    pub fn state(&self) -> DebateState {
        self.inner.session.lock().state
    }

    /// Pause at the next round boundary.
    ///
    /// Pausing a paused session returns the existing snapshot unchanged.
    pub async fn pause(&self, reason: Option<String>) -> EngineResult<DebateSession> {
        let snapshot = {
            let mut session = self.inner.session.lock();
            match session.state {
                DebateState::Paused => return Ok(session.clone()),
                DebateState::Running if !self.inner.force.is_cancelled() => {
                    session.state = DebateState::Paused;
                    session.paused_at = Some(Utc::now());
                    session.pause_reason = reason;
                    session.touch();
                    session.clone()
                }
                from => {
                    return Err(DebateError::InvalidTransition {
                        from,
                        command: "pause",
                    })
                }
            }
        };
        self.inner.paused.send_replace(true);
        tracing::info!(session_id = %snapshot.id, reason = ?snapshot.pause_reason, "Debate paused");
        self.commit(&snapshot).await;
        Ok(snapshot)
    }

    /// Resume a paused session; resuming a running session is a no-op.
    pub async fn resume(&self) -> EngineResult<DebateSession> {
        let snapshot = {
            let mut session = self.inner.session.lock();
            match session.state {
                DebateState::Running => return Ok(session.clone()),
                DebateState::Paused => {
                    session.state = DebateState::Running;
                    session.paused_at = None;
                    session.pause_reason = None;
                    session.touch();
                    session.clone()
                }
                from => {
                    return Err(DebateError::InvalidTransition {
                        from,
                        command: "resume",
                    })
                }
            }
        };
        self.inner.paused.send_replace(false);
        tracing::info!(session_id = %snapshot.id, "Debate resumed");
        self.commit(&snapshot).await;
        Ok(snapshot)
    }

    /// Add context for the next round. Entries keep insertion order.
    pub async fn add_context(
        &self,
        text: impl Into<String>,
        injected_by: impl Into<String>,
    ) -> EngineResult<DebateSession> {
        let text = text.into();
        let injected_by = injected_by.into();
        let snapshot = {
            let mut session = self.inner.session.lock();
            if !matches!(session.state, DebateState::Running | DebateState::Paused) {
                return Err(DebateError::InvalidTransition {
                    from: session.state,
                    command: "add context to",
                });
            }
            let started = self.inner.rounds_started.load(Ordering::SeqCst);
            let applies_to_round = session.current_round.max(started) + 1;
            session.additional_context.push(ContextEntry {
                text,
                injected_at: Utc::now(),
                injected_by,
                applies_to_round,
            });
            session.touch();
            session.clone()
        };
        tracing::info!(
            session_id = %snapshot.id,
            applies_to_round = snapshot.additional_context.last().map(|e| e.applies_to_round),
            "Context added"
        );
        self.commit(&snapshot).await;
        Ok(snapshot)
    }

    /// Conclude with the opinions gathered so far.
    ///
    /// The debate loop performs the terminal transition; repeated requests
    /// are idempotent until then.
    pub async fn force_consensus(&self) -> EngineResult<DebateSession> {
        let snapshot = {
            let session = self.inner.session.lock();
            if !matches!(session.state, DebateState::Running | DebateState::Paused) {
                return Err(DebateError::InvalidTransition {
                    from: session.state,
                    command: "force consensus on",
                });
            }
            session.clone()
        };
        if !self.inner.force.is_cancelled() {
            tracing::info!(session_id = %snapshot.id, "Force consensus requested");
            self.inner.force.cancel();
        }
        Ok(snapshot)
    }

    /// Record that `round` is about to build its prompts; context added
    /// from now on applies to the round after it.
    pub(crate) fn begin_round(&self, round: u32) {
        self.inner.rounds_started.fetch_max(round, Ordering::SeqCst);
    }

    pub fn is_force_requested(&self) -> bool {
        self.inner.force.is_cancelled()
    }

    /// Resolves once a force-consensus has been requested.
    pub async fn force_requested(&self) {
        self.inner.force.cancelled().await
    }

    /// Block while the session is paused, unless a force is requested.
    pub async fn wait_while_paused(&self) {
        let mut paused = self.inner.paused.subscribe();
        loop {
            if !*paused.borrow_and_update() || self.inner.force.is_cancelled() {
                return;
            }
            tokio::select! {
                changed = paused.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = self.inner.force.cancelled() => return,
            }
        }
    }

    /// Apply a loop-side change, then persist and publish it.
    pub(crate) async fn update<F>(&self, apply: F) -> DebateSession
    where
        F: FnOnce(&mut DebateSession),
    {
        let snapshot = {
            let mut session = self.inner.session.lock();
            apply(&mut session);
            session.touch();
            session.clone()
        };
        if snapshot.state.is_terminal() {
            self.inner.paused.send_replace(false);
        }
        self.commit(&snapshot).await;
        snapshot
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub(crate) fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// Persist and publish; store failures are logged, never fatal.
    async fn commit(&self, snapshot: &DebateSession) {
        if let Err(e) = self.inner.store.save_session(snapshot).await {
            tracing::warn!(session_id = %snapshot.id, error = %e, "Failed to persist session");
        }
        self.inner.events.publish(DebateEvent::SessionUpdated {
            session: snapshot.clone(),
        });
    }
}

impl std::fmt::Debug for SessionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("SessionControl")
            .field("id", &session.id)
            .field("state", &session.state)
            .field("revision", &session.revision)
            .finish()
    }
}
