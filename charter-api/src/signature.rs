use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is missing or malformed")]
    Malformed,
    #[error("signature timestamp is outside the tolerance window")]
    Stale,
    #[error("no signature matches the payload")]
    Mismatch,
}

/// Verify a `t=<unix>,v1=<hex>[,v1=<hex>...]` header over `"{t}.{body}"`.
///
/// Any `v1` entry may match; several appear while a secret is being rolled.
pub fn verify(
    header: &str,
    body: &[u8],
    secret: &str,
    tolerance_seconds: i64,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    // `t` is unauthenticated and may be any i64.
    let tolerance = u64::try_from(tolerance_seconds).unwrap_or(0);
    if now_unix.abs_diff(timestamp) > tolerance {
        return Err(SignatureError::Stale);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|expected| mac.clone().verify_slice(&expected).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Header value for `body` signed at `timestamp`. Used by tests and local tooling.
pub fn sign(body: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC takes keys of any length.
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_900_000_000;

    #[test]
    fn test_valid_signature_passes() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign(body, SECRET, NOW - 10);
        assert_eq!(verify(&header, body, SECRET, 300, NOW), Ok(()));
    }

    #[test]
    fn test_tampered_body_fails() {
        let header = sign(b"{}", SECRET, NOW);
        assert_eq!(verify(&header, b"{ }", SECRET, 300, NOW), Err(SignatureError::Mismatch));
        assert_eq!(verify(&header, b"{}", "whsec_other", 300, NOW), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_old_timestamp_is_rejected() {
        let header = sign(b"{}", SECRET, NOW - 301);
        assert_eq!(verify(&header, b"{}", SECRET, 300, NOW), Err(SignatureError::Stale));
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={t},v1=00");
            assert_eq!(verify(&header, b"{}", SECRET, 300, NOW), Err(SignatureError::Stale));
        }
        let header = format!("t={},v1=00", i64::MIN);
        assert_eq!(verify(&header, b"{}", SECRET, 300, i64::MAX), Err(SignatureError::Stale));
    }

    #[test]
    fn test_rolled_secret_second_candidate_matches() {
        let good = sign(b"{}", SECRET, NOW);
        let v1 = good.split_once(",v1=").unwrap().1;
        let header = format!("t={NOW},v1={},v1={v1}", "00".repeat(32));
        assert_eq!(verify(&header, b"{}", SECRET, 300, NOW), Ok(()));
    }

    #[test]
    fn test_garbage_header_is_malformed() {
        assert_eq!(verify("nonsense", b"{}", SECRET, 300, NOW), Err(SignatureError::Malformed));
        assert_eq!(verify("t=abc,v1=00", b"{}", SECRET, 300, NOW), Err(SignatureError::Malformed));
    }
}
