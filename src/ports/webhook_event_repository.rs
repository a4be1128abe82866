//! WebhookEventRepository port - ledger of processed gateway webhooks.
//!
//! The gateway delivers at least once and may retry after a timeout even
//! when we processed the event, so every delivery is checked against this
//! ledger before anything is applied. The ledger write is also what makes
//! the webhook endpoint answer 200.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::subscription::WebhookOutcome;

/// Record of a processed webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub processed_at: Timestamp,
    pub outcome: WebhookOutcome,
    /// Failure or ignore reason.
    pub error_message: Option<String>,
    /// Original delivery body for reconciliation.
    pub payload: serde_json::Value,
}

impl WebhookEventRecord {
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        outcome: WebhookOutcome,
        payload: serde_json::Value,
        processed_at: Timestamp,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            processed_at,
            outcome,
            error_message: None,
            payload,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.error_message = Some(reason.into());
        self
    }
}

/// Result of attempting to save a webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// First time seeing this event.
    Inserted,
    /// Another delivery of the same event got there first.
    AlreadyExists,
}

/// Implementations must key on `event_id` with a uniqueness guarantee so
/// concurrent deliveries of one event resolve to a single `Inserted`.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError>;

    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError>;

    /// Deletes records processed before `cutoff`; returns how many.
    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}
