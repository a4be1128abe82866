//! Parsing of payment-gateway webhook deliveries.
//!
//! Deliveries look like
//! `{"event_id", "type", "created_at", "data": {"type", "id", "object": {...}}}`.
//! Only the fields the subscription lifecycle needs are extracted; the raw
//! `data` value is kept for the audit log.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::domain::foundation::{Timestamp, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEventType {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    InvoicePaymentMade,
    InvoicePaymentFailed,
    Unknown,
}

impl GatewayEventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "subscription.created" => GatewayEventType::SubscriptionCreated,
            "subscription.updated" => GatewayEventType::SubscriptionUpdated,
            "subscription.canceled" | "subscription.cancelled" => {
                GatewayEventType::SubscriptionCanceled
            }
            "invoice.payment_made" => GatewayEventType::InvoicePaymentMade,
            "invoice.payment_failed" | "invoice.scheduled_charge_failed" => {
                GatewayEventType::InvoicePaymentFailed
            }
            _ => GatewayEventType::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    data: serde_json::Value,
}

/// A parsed webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub event_id: String,
    pub event_type: GatewayEventType,
    /// The type string as delivered, kept for logs.
    pub raw_type: String,
    pub created_at: Option<Timestamp>,
    pub data: serde_json::Value,
}

impl GatewayEvent {
    /// Parses a raw webhook body.
    ///
    /// A delivery without an `event_id` is keyed by the SHA-256 of its body,
    /// so a byte-identical redelivery is still recognised.
    pub fn parse(payload: &[u8]) -> Result<Self, ValidationError> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| ValidationError::invalid_format("payload", e.to_string()))?;

        if raw.event_type.trim().is_empty() {
            return Err(ValidationError::empty_field("type"));
        }

        let event_id = match raw.event_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => format!("sha256:{:x}", Sha256::digest(payload)),
        };

        Ok(Self {
            event_id,
            event_type: GatewayEventType::parse(&raw.event_type),
            raw_type: raw.event_type,
            created_at: raw.created_at.map(Timestamp::from_datetime),
            data: raw.data,
        })
    }

    /// The subscription object carried by `subscription.*` events.
    pub fn subscription(&self) -> Result<GatewaySubscription, ValidationError> {
        let object = self
            .data
            .pointer("/object/subscription")
            .cloned()
            .ok_or_else(|| ValidationError::empty_field("data.object.subscription"))?;
        serde_json::from_value(object)
            .map_err(|e| ValidationError::invalid_format("data.object.subscription", e.to_string()))
    }

    /// The invoice object carried by `invoice.*` events.
    pub fn invoice(&self) -> Result<GatewayInvoice, ValidationError> {
        let object = self
            .data
            .pointer("/object/invoice")
            .cloned()
            .ok_or_else(|| ValidationError::empty_field("data.object.invoice"))?;
        serde_json::from_value(object)
            .map_err(|e| ValidationError::invalid_format("data.object.invoice", e.to_string()))
    }
}

/// Gateway-side view of a recurring subscription.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Last day paid for, `YYYY-MM-DD`.
    #[serde(default)]
    pub charged_through_date: Option<String>,
    /// Monotonic revision of the gateway object.
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub customer_id: Option<String>,
}

impl GatewaySubscription {
    /// Billing-through date as midnight UTC.
    pub fn charged_through(&self) -> Result<Option<Timestamp>, ValidationError> {
        self.charged_through_date
            .as_deref()
            .map(|raw| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map(Timestamp::from_date)
                    .map_err(|_| {
                        ValidationError::invalid_format(
                            "charged_through_date",
                            format!("expected YYYY-MM-DD, got '{}'", raw),
                        )
                    })
            })
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayInvoice {
    pub id: String,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}
