//! Webhook request authentication
//!
//! Worker instances sign every webhook with HMAC-SHA256 over
//! `timestamp + raw body` using the shared secret. Verification is
//! constant time inside the `hmac` verifier, and timestamps outside the
//! accepted skew window are rejected before any MAC work happens.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded request signature
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Header carrying the signing timestamp as epoch seconds
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Missing timestamp header")]
    MissingTimestamp,

    #[error("Malformed timestamp header")]
    MalformedTimestamp,

    /// The signing clock and ours disagree by more than the tolerance
    #[error("Timestamp outside the accepted window (skew {0}s)")]
    StaleTimestamp(i64),

    #[error("Malformed signature encoding")]
    MalformedSignature,

    #[error("Invalid signing key")]
    InvalidKey,

    #[error("Signature mismatch")]
    Mismatch,
}

/// Verify a signed request.
///
/// `timestamp` is the raw header value; it is authenticated because the
/// MAC covers it, so a replayed body cannot borrow a fresh timestamp.
pub fn verify(
    secret: &str,
    timestamp: &str,
    signature_hex: &str,
    body: &[u8],
    now_epoch: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let timestamp = timestamp.trim();
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::MalformedTimestamp)?;

    let skew = now_epoch - ts;
    if skew.abs() > tolerance_secs {
        return Err(SignatureError::StaleTimestamp(skew));
    }

    let provided = decode_hex(signature_hex.trim()).ok_or(SignatureError::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.as_bytes());
    mac.update(body);

    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

/// Produce the signature an instance would send for this payload.
/// Used by tests and the delivery-probe tooling.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.trim().as_bytes());
    mac.update(body);

    Ok(encode_hex(&mac.finalize().into_bytes()))
}

fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || s.is_empty() {
        return None;
    }

    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";
    const TOLERANCE: i64 = 300;

    #[test]
    fn test_round_trip_verifies() {
        let body = br#"{"event":"session_ready","session_id":"s1"}"#;
        let sig = sign(SECRET, "1700000000", body).unwrap();

        assert_eq!(
            verify(SECRET, "1700000000", &sig, body, 1_700_000_000, TOLERANCE),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_body_rejected() {
        let sig = sign(SECRET, "1700000000", b"original").unwrap();

        assert_eq!(
            verify(SECRET, "1700000000", &sig, b"tampered", 1_700_000_000, TOLERANCE),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sig = sign("other-secret", "1700000000", b"body").unwrap();

        assert_eq!(
            verify(SECRET, "1700000000", &sig, b"body", 1_700_000_000, TOLERANCE),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_timestamp_is_covered_by_the_mac() {
        // A valid signature replayed under a fresher timestamp must fail
        let body = b"body";
        let sig = sign(SECRET, "1700000000", body).unwrap();

        assert_eq!(
            verify(SECRET, "1700000400", &sig, body, 1_700_000_400, TOLERANCE),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_skew_window() {
        let body = b"body";

        let sig = sign(SECRET, "1700000000", body).unwrap();
        assert_eq!(
            verify(SECRET, "1700000000", &sig, body, 1_700_000_300, TOLERANCE),
            Ok(())
        );
        assert_eq!(
            verify(SECRET, "1700000000", &sig, body, 1_700_000_301, TOLERANCE),
            Err(SignatureError::StaleTimestamp(301))
        );

        // A timestamp from the future is just as stale
        let sig = sign(SECRET, "1700000400", body).unwrap();
        assert_eq!(
            verify(SECRET, "1700000400", &sig, body, 1_700_000_000, TOLERANCE),
            Err(SignatureError::StaleTimestamp(-400))
        );
    }

    #[test]
    fn test_malformed_inputs() {
        assert_eq!(
            verify(SECRET, "not-a-number", "aa", b"", 0, TOLERANCE),
            Err(SignatureError::MalformedTimestamp)
        );
        assert_eq!(
            verify(SECRET, "0", "zz", b"", 0, TOLERANCE),
            Err(SignatureError::MalformedSignature)
        );
        assert_eq!(
            verify(SECRET, "0", "abc", b"", 0, TOLERANCE),
            Err(SignatureError::MalformedSignature)
        );
        assert_eq!(
            verify(SECRET, "0", "", b"", 0, TOLERANCE),
            Err(SignatureError::MalformedSignature)
        );
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let body = b"body";
        let sig = sign(SECRET, "1700000000", body).unwrap().to_uppercase();

        assert_eq!(
            verify(SECRET, "1700000000", &sig, body, 1_700_000_000, TOLERANCE),
            Ok(())
        );
    }

    #[test]
    fn test_hex_round_trip() {
        assert_eq!(encode_hex(&[0x00, 0xff, 0x1a]), "00ff1a");
        assert_eq!(decode_hex("00ff1a"), Some(vec![0x00, 0xff, 0x1a]));
        assert_eq!(decode_hex("0"), None);
        assert_eq!(decode_hex(""), None);
    }
}
