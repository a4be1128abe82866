//! Webhook signature verification port.

use super::PaymentError;

/// Checks that a webhook body was signed by the gateway.
///
/// `signature` is the raw header value; `None` when the header was absent.
pub trait WebhookSignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), PaymentError>;
}
