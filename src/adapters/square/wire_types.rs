//! Square API request and response bodies.
//!
//! Only the fields this service reads are modelled. Money amounts arrive as
//! JSON integers of unbounded width and are narrowed with
//! [`SquareMoney::to_money`] before leaving the adapter.

use serde::{Deserialize, Serialize};

use crate::ports::{BillingSubscription, ChargeReceipt, ChargeStatus, Money, PaymentError, StoredCard};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareMoney {
    pub amount: serde_json::Number,
    pub currency: String,
}

impl SquareMoney {
    pub fn from_money(money: &Money) -> Self {
        Self {
            amount: serde_json::Number::from(money.amount_minor_units),
            currency: money.currency.clone(),
        }
    }

    /// Narrows the wire amount to `i64` minor units.
    pub fn to_money(&self) -> Result<Money, PaymentError> {
        let amount = self.amount.as_i64().ok_or_else(|| {
            PaymentError::provider(format!(
                "amount {} does not fit in integer minor units",
                self.amount
            ))
        })?;
        Ok(Money::new(amount, self.currency.clone()))
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Requests
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct CreateCustomerBody<'a> {
    pub idempotency_key: &'a str,
    pub reference_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentBody<'a> {
    pub idempotency_key: &'a str,
    pub source_id: &'a str,
    pub amount_money: SquareMoney,
    pub customer_id: &'a str,
    pub location_id: &'a str,
    pub autocomplete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct CreateCardBody<'a> {
    pub idempotency_key: &'a str,
    pub source_id: &'a str,
    pub card: NewCard<'a>,
}

#[derive(Debug, Serialize)]
pub struct NewCard<'a> {
    pub customer_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cardholder_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct CreateSubscriptionBody<'a> {
    pub idempotency_key: &'a str,
    pub location_id: &'a str,
    pub plan_variation_id: &'a str,
    pub customer_id: &'a str,
    pub card_id: &'a str,
    /// `YYYY-MM-DD`
    pub start_date: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// Responses
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct SquareCustomer {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct CustomerResponse {
    pub customer: SquareCustomer,
}

#[derive(Debug, Deserialize)]
pub struct SquarePayment {
    pub id: String,
    pub status: String,
    pub amount_money: SquareMoney,
}

impl SquarePayment {
    pub fn into_receipt(self) -> Result<ChargeReceipt, PaymentError> {
        Ok(ChargeReceipt {
            amount: self.amount_money.to_money()?,
            status: ChargeStatus::from_gateway(&self.status),
            charge_id: self.id,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentResponse {
    pub payment: SquarePayment,
}

#[derive(Debug, Deserialize)]
pub struct SquareCard {
    pub id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub card_brand: Option<String>,
    #[serde(default)]
    pub last_4: Option<String>,
    #[serde(default)]
    pub exp_month: Option<u32>,
    #[serde(default)]
    pub exp_year: Option<u32>,
    #[serde(default)]
    pub enabled: bool,
}

impl From<SquareCard> for StoredCard {
    fn from(card: SquareCard) -> Self {
        Self {
            id: card.id,
            customer_id: card.customer_id,
            last4: card.last_4.unwrap_or_default(),
            brand: card.card_brand.unwrap_or_else(|| "OTHER_BRAND".to_string()),
            exp_month: card.exp_month.unwrap_or_default(),
            exp_year: card.exp_year.unwrap_or_default(),
            enabled: card.enabled,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CardResponse {
    pub card: SquareCard,
}

#[derive(Debug, Deserialize)]
pub struct ListCardsResponse {
    #[serde(default)]
    pub cards: Vec<SquareCard>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SquareSubscription {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
}

impl From<SquareSubscription> for BillingSubscription {
    fn from(sub: SquareSubscription) -> Self {
        Self {
            id: sub.id,
            status: sub.status.unwrap_or_default(),
            version: sub.version,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionResponse {
    pub subscription: SquareSubscription,
}

/// Error envelope returned with every non-2xx response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<SquareApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SquareApiError {
    pub category: String,
    pub code: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PaymentErrorCode;
    use serde_json::json;

    #[test]
    fn payment_response_narrows_amount() {
        let response: PaymentResponse = serde_json::from_value(json!({
            "payment": {
                "id": "pay-1",
                "status": "COMPLETED",
                "amount_money": {"amount": 999, "currency": "USD"}
            }
        }))
        .unwrap();

        let receipt = response.payment.into_receipt().unwrap();

        assert_eq!(receipt.amount, Money::new(999, "USD"));
        assert_eq!(receipt.status, ChargeStatus::Completed);
    }

    #[test]
    fn oversized_amount_is_a_provider_error() {
        let response: PaymentResponse = serde_json::from_str(
            r#"{"payment":{"id":"p","status":"COMPLETED","amount_money":{"amount":18446744073709551615,"currency":"USD"}}}"#,
        )
        .unwrap();

        let err = response.payment.into_receipt().unwrap_err();

        assert_eq!(err.code, PaymentErrorCode::ProviderError);
    }

    #[test]
    fn card_fills_missing_fields() {
        let card: StoredCard = serde_json::from_value::<SquareCard>(json!({
            "id": "ccof-1",
            "last_4": "1111",
            "enabled": true
        }))
        .unwrap()
        .into();

        assert_eq!(card.last4, "1111");
        assert_eq!(card.brand, "OTHER_BRAND");
        assert!(card.enabled);
        assert!(card.customer_id.is_none());
    }

    #[test]
    fn error_envelope_parses() {
        let body: ErrorResponse = serde_json::from_value(json!({
            "errors": [{"category": "PAYMENT_METHOD_ERROR", "code": "GENERIC_DECLINE", "detail": "Card declined."}]
        }))
        .unwrap();

        assert_eq!(body.errors[0].code, "GENERIC_DECLINE");
    }
}
