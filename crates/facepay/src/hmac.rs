//! Request signing between the terminal and the fee sponsor.
//!
//! The terminal signs `"{attempt_id}.{body}"` so a captured signature cannot
//! be replayed under a different attempt id header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::payment::AttemptId;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature of a sponsor request.
pub const SPONSOR_AUTH_HEADER: &str = "X-Sponsor-Auth";

/// Header carrying the attempt id the signature is bound to.
pub const ATTEMPT_ID_HEADER: &str = "X-Attempt-Id";

fn mac_for(secret: &[u8], attempt_id: &AttemptId, body: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(attempt_id.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Hex HMAC-SHA256 of a transfer request body.
pub fn sign_transfer(secret: &[u8], attempt_id: &AttemptId, body: &[u8]) -> String {
    hex_encode(&mac_for(secret, attempt_id, body).finalize().into_bytes())
}

/// Constant-time check of a signature produced by [`sign_transfer`].
///
/// The sponsor side of the exchange: a sponsor service built on this crate
/// checks `X-Sponsor-Auth` against the raw body and `X-Attempt-Id` with it.
pub fn verify_transfer(secret: &[u8], attempt_id: &AttemptId, body: &[u8], signature: &str) -> bool {
    let mac = mac_for(secret, attempt_id, body);
    // Malformed hex still goes through verify_slice so timing does not depend on it.
    let expected = hex_decode(signature).unwrap_or_else(|| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
