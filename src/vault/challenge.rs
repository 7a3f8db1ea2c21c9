//! SAML client verifier.
//!
//! The verifier stays on the client; only `base64(sha256(verifier))` is sent with the
//! role lookup. Vault hands the token out only to the caller presenting the verifier.

use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct ClientVerifier(SecretString);

impl ClientVerifier {
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes);

        Self(SecretString::from(Base64UrlUnpadded::encode_string(&bytes)))
    }

    #[must_use]
    pub fn from_secret(secret: SecretString) -> Self {
        Self(secret)
    }

    #[must_use]
    pub fn challenge(&self) -> String {
        let digest = Sha256::digest(self.0.expose_secret().as_bytes());
        Base64::encode_string(&digest)
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let a = ClientVerifier::generate();
        let b = ClientVerifier::generate();
        assert_ne!(a.expose(), b.expose());
        assert_eq!(a.expose().len(), 43);
    }

    #[test]
    fn test_challenge_is_sha256_base64() {
        let verifier = ClientVerifier::from_secret(SecretString::from("abc".to_string()));
        // sha256("abc")
        assert_eq!(
            verifier.challenge(),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }
}
