//! Crypto seam
//!
//! The commissioner core needs very little cryptography of its own: joiner
//! ids are SHA-256 derived, and CCM token installation validates a COSE
//! signature against a signer certificate. The latter lives behind the
//! [`Crypto`] trait so deployments can plug in their TLS stack's X.509
//! machinery; [`DefaultCrypto`] covers the hash and declines token
//! verification.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// One-shot SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// External crypto provider consumed by the engine.
pub trait Crypto: Send {
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        sha256(data)
    }

    /// Validate a COSE-signed commissioner token against the signer's
    /// certificate (PEM, NUL-terminated).
    fn verify_cose_token(&self, signed_token: &[u8], signer_cert: &[u8]) -> Result<()>;
}

/// Provider used when no platform crypto has been installed.
#[derive(Debug, Default)]
pub struct DefaultCrypto;

impl Crypto for DefaultCrypto {
    fn verify_cose_token(&self, _signed_token: &[u8], _signer_cert: &[u8]) -> Result<()> {
        Err(Error::Security(
            "token verification requires a platform crypto provider".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_default_crypto_declines_tokens() {
        let crypto = DefaultCrypto;
        assert!(matches!(
            crypto.verify_cose_token(b"token", b"cert"),
            Err(Error::Security(_))
        ));
    }
}
