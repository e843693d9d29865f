//! HMAC-SHA256 webhook signature verification

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Prefix used by GitHub-style signature headers. Gitea sends bare hex.
pub const SIGNATURE_PREFIX: &str = "sha256=";

fn keyed_mac(payload: &[u8], secret: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(mac)
}

/// Lowercase hex HMAC-SHA256 of `payload` keyed with `secret`.
pub fn sign(payload: &[u8], secret: &str) -> Option<String> {
    keyed_mac(payload, secret).map(|mac| hex::encode(mac.finalize().into_bytes()))
}

/// Checks `signature` (bare hex or `sha256=`-prefixed) against the payload.
/// Malformed signatures simply fail verification.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let presented = signature.trim();
    let presented = presented
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(presented)
        .to_ascii_lowercase();

    let presented_bytes = match hex::decode(&presented) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Signature is not valid hex: {}", e);
            return false;
        }
    };

    let Some(mac) = keyed_mac(payload, secret) else {
        return false;
    };

    // verify_slice compares in constant time and rejects length mismatches
    mac.verify_slice(&presented_bytes).is_ok()
}
