//! Audit entries for gateway webhook deliveries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Timestamp, ValidationError};

/// What happened to a delivered webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// State on a tracked record changed.
    Applied,
    /// Kept for audit only (invoice events).
    Recorded,
    /// Nothing to do: unknown type or untracked subscription.
    Ignored,
    /// Older than the gateway version already applied.
    Stale,
    /// Applying failed; needs manual reconciliation.
    Failed,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Recorded => "recorded",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Stale => "stale",
            WebhookOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "applied" => Ok(WebhookOutcome::Applied),
            "recorded" => Ok(WebhookOutcome::Recorded),
            "ignored" => Ok(WebhookOutcome::Ignored),
            "stale" => Ok(WebhookOutcome::Stale),
            "failed" => Ok(WebhookOutcome::Failed),
            other => Err(ValidationError::invalid_format(
                "outcome",
                format!("unknown webhook outcome '{}'", other),
            )),
        }
    }
}

impl fmt::Display for WebhookOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a subscription's append-only webhook log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookLogEntry {
    pub event_type: String,
    pub event_id: String,
    pub processed_at: Timestamp,
    pub data: serde_json::Value,
    pub outcome: WebhookOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookLogEntry {
    pub fn new(
        event_type: impl Into<String>,
        event_id: impl Into<String>,
        data: serde_json::Value,
        outcome: WebhookOutcome,
        processed_at: Timestamp,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: event_id.into(),
            processed_at,
            data,
            outcome,
            error: None,
        }
    }

    /// Entry with an error marker for manual reconciliation.
    pub fn failed(
        event_type: impl Into<String>,
        event_id: impl Into<String>,
        data: serde_json::Value,
        error: impl Into<String>,
        processed_at: Timestamp,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(event_type, event_id, data, WebhookOutcome::Failed, processed_at)
        }
    }
}
