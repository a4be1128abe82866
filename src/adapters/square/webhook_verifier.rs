//! Square webhook signature verification.
//!
//! Square signs `notification_url + body` with HMAC-SHA256 using the
//! subscription's signature key and sends the base64 digest in the
//! `x-square-hmacsha256-signature` header.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::ports::{PaymentError, PaymentErrorCode, WebhookSignatureVerifier};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-square-hmacsha256-signature";

/// Verifies Square webhook signatures.
#[derive(Clone)]
pub struct SquareWebhookVerifier {
    signature_key: SecretString,
    notification_url: String,
}

impl SquareWebhookVerifier {
    /// `notification_url` must match the URL registered with Square exactly.
    pub fn new(signature_key: impl Into<String>, notification_url: impl Into<String>) -> Self {
        Self {
            signature_key: SecretString::new(signature_key.into()),
            notification_url: notification_url.into(),
        }
    }

    fn expected_signature(&self, payload: &[u8]) -> Result<Vec<u8>, PaymentError> {
        let mut mac = HmacSha256::new_from_slice(self.signature_key.expose_secret().as_bytes())
            .map_err(|e| PaymentError::provider(format!("invalid signature key: {}", e)))?;
        mac.update(self.notification_url.as_bytes());
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn rejected(message: &str) -> PaymentError {
    PaymentError::new(PaymentErrorCode::AuthenticationError, message)
}

impl WebhookSignatureVerifier for SquareWebhookVerifier {
    fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), PaymentError> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| rejected("missing signature header"))?;

        let provided = BASE64
            .decode(signature)
            .map_err(|_| rejected("signature is not valid base64"))?;
        let expected = self.expected_signature(payload)?;

        if expected.ct_eq(&provided).unwrap_u8() != 1 {
            tracing::warn!(payload_len = payload.len(), "Invalid webhook signature");
            return Err(rejected("invalid signature"));
        }

        Ok(())
    }
}
