// Push-webhook signature validation.
//
// Push events must carry an HMAC-SHA256 signature over the raw request body,
// hex-encoded, optionally prefixed with "sha256=". Validation is
// constant-time via the Mac verifier.

use crate::errors::TriggerError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Validate the HMAC-SHA256 signature of a push webhook request
pub fn validate_push_signature(
    payload: &[u8],
    signature: &str,
    secret: &str,
) -> Result<(), TriggerError> {
    let hex_signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let signature_bytes = hex::decode(hex_signature)
        .map_err(|_| TriggerError::InvalidPayload("signature is not valid hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        TriggerError::InvalidPayload(format!("invalid webhook secret: {}", e))
    })?;
    mac.update(payload);

    mac.verify_slice(&signature_bytes)
        .map_err(|_| TriggerError::InvalidSignature)
}

/// Sign a payload the way a sender would; used by tests and tooling
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
