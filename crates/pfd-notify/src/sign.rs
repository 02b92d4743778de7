//! Webhook payload signing.
//!
//! Signature base is `timestamp + "." + raw_body_bytes`; the header value
//! is `"sha256=" + lowercase_hex(HMAC_SHA256(secret, base))`. Verification
//! is constant-time via the MAC verify API.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(timestamp: &str, body: &[u8], secret: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

pub fn sign_payload(timestamp: &str, body: &[u8], secret: &str) -> String {
    let digest = mac_for(timestamp, body, secret).finalize().into_bytes();
    format!("sha256={}", hex::encode(digest))
}

pub fn verify_signature(timestamp: &str, body: &[u8], signature: &str, secret: &str) -> bool {
    let Some(hex_digest) = signature.trim().strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    mac_for(timestamp, body, secret)
        .verify_slice(&expected)
        .is_ok()
}
