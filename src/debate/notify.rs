//! Completion notifications.
//!
//! One notice is sent per finished debate, fire-and-forget: delivery errors
//! are logged and never affect the debate outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{DebateResult, DebateState};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook rejected notification with status {0}")]
    Rejected(u16),
}

/// Summary sent when a debate reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionNotice {
    /// `debate.completed` or `debate.failed`.
    pub event: String,
    pub session_id: String,
    pub debate_id: String,
    pub status: DebateState,
    pub total_rounds: u32,
    pub total_cost_usd: f64,
    pub consensus_score: f64,
    pub winner: Option<String>,
    pub error_message: Option<String>,
}

impl CompletionNotice {
    pub fn from_result(result: &DebateResult) -> Self {
        let event = if result.status == DebateState::Failed {
            "debate.failed"
        } else {
            "debate.completed"
        };
        Self {
            event: event.to_string(),
            session_id: result.session_id.clone(),
            debate_id: result.debate_id.clone(),
            status: result.status,
            total_rounds: result.total_rounds,
            total_cost_usd: result.total_cost_usd,
            consensus_score: result.consensus_score,
            winner: result.winner().map(|o| o.text.clone()),
            error_message: result.error_message.clone(),
        }
    }
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError>;
}

/// Writes the notice to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl CompletionNotifier for LogNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        tracing::info!(
            event = %notice.event,
            session_id = %notice.session_id,
            status = %notice.status,
            rounds = notice.total_rounds,
            cost_usd = notice.total_cost_usd,
            consensus_score = notice.consensus_score,
            winner = notice.winner.as_deref().unwrap_or("-"),
            "Debate finished"
        );
        Ok(())
    }
}

/// POSTs the notice as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for webhooks");
                reqwest::Client::new()
            });
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CompletionNotifier for WebhookNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(notice).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        tracing::debug!(url = %self.url, session_id = %notice.session_id, "Webhook delivered");
        Ok(())
    }
}

/// Deliver a notice in the background.
pub fn spawn_notification(notifier: Arc<dyn CompletionNotifier>, notice: CompletionNotice) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&notice).await {
            tracing::warn!(
                session_id = %notice.session_id,
                error = %e,
                "Completion notification failed"
            );
        }
    });
}
