//! PKCE (RFC 7636) verifier/challenge generation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generates a fresh PKCE pair.
///
/// The verifier is 32 random bytes base64url-encoded; the challenge is the
/// base64url-encoded SHA-256 of the verifier (`S256` method).
pub fn generate_pair() -> (String, String) {
    let mut random_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random_bytes);

    let code_verifier = URL_SAFE_NO_PAD.encode(random_bytes);
    let code_challenge = challenge_for(&code_verifier);

    (code_verifier, code_challenge)
}

/// Computes the S256 challenge for a given verifier.
pub fn challenge_for(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_fresh_each_time() {
        let (v1, c1) = generate_pair();
        let (v2, c2) = generate_pair();
        assert_ne!(v1, v2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_challenge_matches_verifier() {
        let (verifier, challenge) = generate_pair();
        assert_eq!(challenge_for(&verifier), challenge);
    }

    #[test]
    fn test_known_s256_vector() {
        // RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = challenge_for(verifier);
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_no_padding_in_encoding() {
        let (verifier, challenge) = generate_pair();
        assert!(!verifier.contains('='));
        assert!(!challenge.contains('='));
    }
}
