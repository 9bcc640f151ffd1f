//! Webhook signature verification.
//!
//! GitHub signs the raw request body with the shared webhook secret and
//! sends `sha256=<hex>` (`x-hub-signature-256`) or the legacy `sha1=<hex>`
//! (`x-hub-signature`). Verification must run over the raw bytes and
//! compare in constant time.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use domain::{DomainError, Result};

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Verify a signature header against the raw payload. Accepts either
/// scheme prefix; returns `Validation` on mismatch or malformed input.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> Result<()> {
    let (scheme, hex_digest) = header
        .split_once('=')
        .ok_or_else(|| DomainError::Validation("malformed signature header".to_string()))?;
    let digest = hex::decode(hex_digest)
        .map_err(|_| DomainError::Validation("signature is not hex".to_string()))?;

    let verified = match scheme {
        "sha256" => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|e| DomainError::Internal(e.to_string()))?;
            mac.update(payload);
            mac.verify_slice(&digest).is_ok()
        }
        "sha1" => {
            let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
                .map_err(|e| DomainError::Internal(e.to_string()))?;
            mac.update(payload);
            mac.verify_slice(&digest).is_ok()
        }
        other => {
            return Err(DomainError::Validation(format!(
                "unsupported signature scheme: {other}"
            )))
        }
    };

    if verified {
        Ok(())
    } else {
        Err(DomainError::Validation("signature mismatch".to_string()))
    }
}

/// Compute the `sha256=` form; used by tests and the webhook simulator.
pub fn sign_sha256(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_sha256_signature_verifies() {
        let payload = br#"{"action":"opened"}"#;
        let header = sign_sha256("topsecret", payload);
        assert!(verify_signature("topsecret", payload, &header).is_ok());
    }

    #[test]
    fn wrong_secret_fails() {
        let payload = b"body";
        let header = sign_sha256("right", payload);
        assert!(verify_signature("wrong", payload, &header).is_err());
    }

    #[test]
    fn tampered_payload_fails() {
        let header = sign_sha256("secret", b"original");
        assert!(verify_signature("secret", b"tampered", &header).is_err());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(verify_signature("s", b"x", "no-equals-sign").is_err());
        assert!(verify_signature("s", b"x", "md5=abcd").is_err());
        assert!(verify_signature("s", b"x", "sha256=nothex!").is_err());
    }
}
