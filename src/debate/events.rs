//! Debate event streaming.
//!
//! The engine publishes every session change on a broadcast bus; transports
//! (polling endpoints, websockets, the CLI) decide how to surface them.

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::moderator::ModeratorDecision;
use super::types::{DebateSession, DebateState, FailureReason};

/// Buffered events per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateEvent {
    /// A new session snapshot; emitted whenever `updated_at` changes.
    SessionUpdated { session: DebateSession },

    RoundCompleted {
        session_id: String,
        round_number: u32,
        opinions: usize,
        failures: usize,
        consensus_score: f64,
        has_consensus: bool,
    },

    ExpertFailed {
        session_id: String,
        round_number: u32,
        expert_id: String,
        reason: FailureReason,
    },

    ModeratorIntervened {
        session_id: String,
        round_number: u32,
        decision: ModeratorDecision,
    },

    /// Terminal signal, published exactly once per session.
    Done {
        session_id: String,
        state: DebateState,
        error_message: Option<String>,
    },
}

impl DebateEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionUpdated { session } => &session.id,
            Self::RoundCompleted { session_id, .. }
            | Self::ExpertFailed { session_id, .. }
            | Self::ModeratorIntervened { session_id, .. }
            | Self::Done { session_id, .. } => session_id,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Broadcast bus shared by all sessions of an engine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DebateEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error.
    pub fn publish(&self, event: DebateEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    /// Raw receiver for every session's events.
    pub fn subscribe(&self) -> broadcast::Receiver<DebateEvent> {
        self.sender.subscribe()
    }

    /// Events of one session; the stream ends after its `Done` event.
    ///
    /// Subscribe before starting the debate to observe every event.
    pub fn subscribe_session(&self, session_id: &str) -> BoxStream<'static, DebateEvent> {
        let session_id = session_id.to_string();
        let events = BroadcastStream::new(self.sender.subscribe())
            .filter_map(move |item| {
                let event = match item {
                    Ok(event) if event.session_id() == session_id => Some(event),
                    Ok(_) => None,
                    Err(lagged) => {
                        tracing::warn!(error = %lagged, "Event subscriber lagged");
                        None
                    }
                };
                future::ready(event)
            })
            .boxed();

        stream::unfold(Some(events), |state| async move {
            let mut events = state?;
            let event = events.next().await?;
            let rest = if event.is_done() { None } else { Some(events) };
            Some((event, rest))
        })
        .boxed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
