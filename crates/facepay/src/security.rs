//! Secret comparison helpers for operator-facing endpoints.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compare two secrets without leaking their content or length through timing.
///
/// Both sides are hashed to fixed-length digests before the constant-time compare.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Check an `Authorization` header value against the expected bearer token.
pub fn bearer_matches(header: Option<&str>, expected: &str) -> bool {
    let presented = header
        .and_then(|h| h.strip_prefix("Bearer "))
        .unwrap_or("");
    // Compare even when the header is missing to keep timing uniform.
    constant_time_eq(presented.as_bytes(), expected.as_bytes()) && !presented.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_match() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokens"));
    }

    #[test]
    fn bearer_header_checked() {
        assert!(bearer_matches(Some("Bearer s3cret"), "s3cret"));
        assert!(!bearer_matches(Some("Bearer wrong"), "s3cret"));
        assert!(!bearer_matches(Some("s3cret"), "s3cret"));
        assert!(!bearer_matches(None, "s3cret"));
    }

    #[test]
    fn empty_token_never_matches() {
        assert!(!bearer_matches(Some("Bearer "), ""));
        assert!(!bearer_matches(None, ""));
    }
}
