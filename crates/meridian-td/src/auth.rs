//! Request signing for the trading endpoints.
//!
//! Every trading request carries a millisecond `timestamp` parameter and an
//! HMAC-SHA256 `signature` computed over the URL-encoded canonical parameter
//! string, in the order the parameters are sent. The server reconstructs the
//! same string from the received query to verify.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute an HMAC-SHA256 signature and return it as a lowercase hex string.
///
/// # Arguments
///
/// * `secret` — the API secret key (UTF-8 string).
/// * `message` — the data to sign (typically the canonical query string).
pub fn hmac_sha256_sign(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    let result = mac.finalize();
    hex::encode(result.into_bytes())
}

/// The canonical string signed for a parameter list: URL-encoded `key=value`
/// pairs joined with `&`, in order.
pub fn canonical_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Append a `timestamp` and the resulting `signature` to `params`.
///
/// Call this fresh for every attempt — a retried request re-signs with a new
/// timestamp rather than replaying a stale one.
pub fn signed_query_pairs(
    mut params: Vec<(String, String)>,
    secret: &str,
    timestamp_ms: u64,
) -> Vec<(String, String)> {
    params.push(("timestamp".to_string(), timestamp_ms.to_string()));
    let signature = hmac_sha256_sign(secret, &canonical_query(&params));
    params.push(("signature".to_string(), signature));
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_produces_hex_digest() {
        let sig = hmac_sha256_sign("test_secret", "symbol=AAPL&timestamp=1754553600000");
        // 32 bytes → 64 hex chars.
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn same_input_signs_identically() {
        let a = hmac_sha256_sign("s", "k=v");
        let b = hmac_sha256_sign("s", "k=v");
        assert_eq!(a, b);
        assert_ne!(a, hmac_sha256_sign("other", "k=v"));
    }

    #[test]
    fn signed_pairs_end_with_timestamp_and_signature() {
        let pairs = signed_query_pairs(
            vec![("symbol".into(), "AAPL".into())],
            "test_secret",
            1754553600000,
        );
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[1], ("timestamp".into(), "1754553600000".into()));
        assert_eq!(pairs[2].0, "signature");

        // The signature covers everything before it.
        let expected = hmac_sha256_sign("test_secret", "symbol=AAPL&timestamp=1754553600000");
        assert_eq!(pairs[2].1, expected);
    }

    #[test]
    fn canonical_query_url_encodes_values() {
        let query = canonical_query(&[("status".into(), "open closed".into())]);
        assert_eq!(query, "status=open%20closed");
    }
}
