//! Webhook signature helpers
//!
//! Channels that carry a webhook secret sign the raw request body with
//! HMAC-SHA256 and send the hex digest in a header. Verification recomputes
//! the digest over the exact bytes received and compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the HMAC-SHA256 signature of a payload, hex-encoded.
pub fn sign_webhook(payload: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");

    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded HMAC-SHA256 signature against a payload.
///
/// Comparison happens inside `Mac::verify_slice`, which is constant-time.
/// Any malformed hex is treated as a failed verification rather than an
/// error: the caller only needs a yes/no.
pub fn verify_webhook(payload: &str, signature_hex: &str, secret: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());

    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let payload = r#"{"ProductId":"12345","CurrentStockLevel":85}"#;
        let secret = "channel_webhook_secret";

        let signature = sign_webhook(payload, secret);
        assert_eq!(signature.len(), 64); // SHA256 -> 64 hex chars

        assert!(verify_webhook(payload, &signature, secret));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let payload = "body";
        let signature = sign_webhook(payload, "secret-a");
        assert!(!verify_webhook(payload, &signature, "secret-b"));
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let signature = sign_webhook("original", "secret");
        assert!(!verify_webhook("tampered", &signature, "secret"));
    }

    #[test]
    fn test_verify_rejects_malformed_hex() {
        assert!(!verify_webhook("body", "not-hex-at-all", "secret"));
        assert!(!verify_webhook("body", "", "secret"));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let sig1 = sign_webhook("payload", "secret");
        let sig2 = sign_webhook("payload", "secret");
        assert_eq!(sig1, sig2);
    }
}
