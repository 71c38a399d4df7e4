//! Delivery signature verification using HMAC-SHA256.
//!
//! The upstream signs every delivery body with the shared webhook secret and
//! sends the result in the `X-Webhook-Signature` header as lowercase hex,
//! optionally prefixed with `sha256=`.
//!
//! Verification is the first step of delivery handling; bodies with invalid
//! signatures are rejected before they are parsed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm tag the upstream may put in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes the lowercase hex HMAC-SHA256 of `payload` keyed by `secret`.
///
/// # Examples
///
/// ```
/// use domain::compute_signature;
///
/// let sig = compute_signature(b"Hello, World!", b"secret");
/// assert_eq!(sig.len(), 64);
/// assert!(sig.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
/// ```
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Formats a hex digest as a prefixed header value (`sha256=<hex>`).
pub fn format_signature_header(hex_signature: &str) -> String {
    format!("{SIGNATURE_PREFIX}{hex_signature}")
}

/// Verifies a delivery signature against the raw body and shared secret.
///
/// Returns `true` only if `provided_signature`, after removing an optional
/// `sha256=` prefix, equals the lowercase hex HMAC-SHA256 of `raw_body`.
/// Malformed input (empty, wrong length, non-hex, uppercase, other algorithm
/// tags) yields `false`. Never panics.
///
/// The digest comparison is constant-time.
///
/// # Examples
///
/// ```
/// use domain::{compute_signature, format_signature_header, verify};
///
/// let body = br#"{"type":"task.created","id":42}"#;
/// let secret = b"my-secret-key";
/// let sig = compute_signature(body, secret);
///
/// assert!(verify(body, secret, &sig));
/// assert!(verify(body, secret, &format_signature_header(&sig)));
/// assert!(!verify(body, b"wrong-secret", &sig));
/// assert!(!verify(body, secret, "sha256=not-hex"));
/// ```
pub fn verify(raw_body: &[u8], secret: &[u8], provided_signature: &str) -> bool {
    let provided = provided_signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(provided_signature);

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(raw_body);
    let expected = hex::encode(mac.finalize().into_bytes());

    // Lengths are public (always 64 for SHA-256); only content is compared in
    // constant time.
    if provided.len() != expected.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ========================================================================
    // Unit tests for known vectors and edge cases
    // ========================================================================

    /// RFC 4231 test case 2.
    #[test]
    fn test_rfc4231_vector() {
        let sig = compute_signature(b"what do ya want for nothing?", b"Jefe");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert!(verify(b"what do ya want for nothing?", b"Jefe", &sig));
    }

    #[test]
    fn test_verify_accepts_prefixed_and_bare_signatures() {
        let body = br#"{"type":"task.created","id":42}"#;
        let sig = compute_signature(body, b"secret");

        assert!(verify(body, b"secret", &sig));
        assert!(verify(body, b"secret", &format_signature_header(&sig)));
    }

    #[test]
    fn test_verify_signature_for_other_body_fails() {
        let sig = compute_signature(br#"{"type":"task.deleted"}"#, b"secret");
        assert!(!verify(br#"{"type":"task.created","id":42}"#, b"secret", &sig));
    }

    #[test]
    fn test_verify_wrong_secret_fails() {
        let sig = compute_signature(b"payload", b"correct-secret");
        assert!(!verify(b"payload", b"wrong-secret", &sig));
    }

    #[test]
    fn test_verify_malformed_signatures_return_false() {
        let body = b"test";
        let secret = b"secret";

        assert!(!verify(body, secret, ""));
        assert!(!verify(body, secret, "sha256="));
        assert!(!verify(body, secret, "sha256=invalid"));
        assert!(!verify(body, secret, "sha1=abc123"));
        assert!(!verify(body, secret, &"z".repeat(64)));
        assert!(!verify(body, secret, &"a".repeat(63)));
        assert!(!verify(body, secret, &"a".repeat(128)));
    }

    #[test]
    fn test_verify_rejects_uppercase_digest() {
        let sig = compute_signature(b"payload", b"secret");
        let upper = sig.to_ascii_uppercase();
        // Only meaningful when the digest has at least one letter, which it
        // does for this fixed input.
        assert_ne!(sig, upper);
        assert!(!verify(b"payload", b"secret", &upper));
    }

    #[test]
    fn test_verify_rejects_unknown_algorithm_tag() {
        let sig = compute_signature(b"payload", b"secret");
        assert!(!verify(b"payload", b"secret", &format!("sha512={sig}")));
        assert!(!verify(b"payload", b"secret", &format!("SHA256={sig}")));
    }

    #[test]
    fn test_verify_empty_payload_and_secret() {
        let sig = compute_signature(b"", b"");
        assert!(verify(b"", b"", &sig));
    }

    #[test]
    fn test_format_signature_header() {
        assert_eq!(format_signature_header("1234abcd"), "sha256=1234abcd");
    }

    // ========================================================================
    // Property-based tests
    // ========================================================================

    proptest! {
        /// verify(B, S, hex(HMAC(S, B))) holds for every body and secret.
        #[test]
        fn prop_valid_signature_verifies(payload: Vec<u8>, secret: Vec<u8>) {
            let sig = compute_signature(&payload, &secret);
            prop_assert!(verify(&payload, &secret, &sig));
        }

        /// The same holds with the algorithm tag in front.
        #[test]
        fn prop_prefixed_signature_verifies(payload: Vec<u8>, secret: Vec<u8>) {
            let header = format_signature_header(&compute_signature(&payload, &secret));
            prop_assert!(verify(&payload, &secret, &header));
        }

        /// Flipping any single bit of a valid header value breaks verification.
        #[test]
        fn prop_single_bit_mutation_fails(
            payload: Vec<u8>,
            secret: Vec<u8>,
            prefixed: bool,
            position in any::<prop::sample::Index>(),
            bit in 0u8..7,
        ) {
            let sig = compute_signature(&payload, &secret);
            let header = if prefixed { format_signature_header(&sig) } else { sig };

            let mut bytes = header.into_bytes();
            let i = position.index(bytes.len());
            bytes[i] ^= 1 << bit;
            // Flipping one of the low seven bits keeps the byte ASCII.
            let mutated = String::from_utf8(bytes).unwrap();

            prop_assert!(!verify(&payload, &secret, &mutated));
        }

        /// Arbitrary signature input never panics.
        #[test]
        fn prop_arbitrary_signature_no_panic(header: String, payload: Vec<u8>, secret: Vec<u8>) {
            let _ = verify(&payload, &secret, &header);
        }

        /// Signatures are always 64 lowercase hex characters.
        #[test]
        fn prop_signature_is_lowercase_hex(payload: Vec<u8>, secret: Vec<u8>) {
            let sig = compute_signature(&payload, &secret);
            prop_assert_eq!(sig.len(), 64);
            prop_assert!(sig.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
        }

        /// A signature over one body does not verify a different body.
        #[test]
        fn prop_modified_payload_fails(original: Vec<u8>, modified: Vec<u8>, secret: Vec<u8>) {
            prop_assume!(original != modified);
            let sig = compute_signature(&original, &secret);
            prop_assert!(!verify(&modified, &secret, &sig));
        }
    }
}
