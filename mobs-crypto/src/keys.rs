//! PEM encode/decode helpers for long-term P-256 key pairs.
//!
//! Key-file I/O proper (reading key material off disk, passphrase prompts)
//! is out of scope per §1 — these are the interfaces that collaborator
//! exposes: parse/format a PEM blob once you already have its bytes.

use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::{PublicKey, SecretKey};

/// Errors from PEM key parsing.
#[derive(Debug)]
pub enum Error {
    /// The PEM text is not a valid PKCS8/SEC1 key of the expected kind.
    InvalidPem,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPem => write!(f, "invalid PEM-encoded P-256 key"),
        }
    }
}
impl std::error::Error for Error {}

/// Parse a PKCS8 PEM private key.
pub fn private_key_from_pem(pem: &str) -> Result<SecretKey, Error> {
    SecretKey::from_pkcs8_pem(pem).map_err(|_| Error::InvalidPem)
}

/// Parse a SubjectPublicKeyInfo PEM public key.
pub fn public_key_from_pem(pem: &str) -> Result<PublicKey, Error> {
    PublicKey::from_public_key_pem(pem).map_err(|_| Error::InvalidPem)
}

/// Encode a private key back to PKCS8 PEM (used by key-provisioning tools).
pub fn private_key_to_pem(key: &SecretKey) -> Result<String, Error> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map(|z| z.to_string())
        .map_err(|_| Error::InvalidPem)
}

/// Encode a public key to SubjectPublicKeyInfo PEM — this is the
/// `MrpcGetPublickey` response payload (§6.1).
pub fn public_key_to_pem(key: &PublicKey) -> Result<String, Error> {
    key.to_public_key_pem(LineEnding::LF).map_err(|_| Error::InvalidPem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::elliptic_curve::rand_core::OsRng;

    #[test]
    fn pem_roundtrip_private() {
        let sk = SecretKey::random(&mut OsRng);
        let pem = private_key_to_pem(&sk).unwrap();
        let back = private_key_from_pem(&pem).unwrap();
        assert_eq!(sk.to_bytes(), back.to_bytes());
    }

    #[test]
    fn pem_roundtrip_public() {
        let sk = SecretKey::random(&mut OsRng);
        let pk = sk.public_key();
        let pem = public_key_to_pem(&pk).unwrap();
        let back = public_key_from_pem(&pem).unwrap();
        assert_eq!(pk, back);
    }

    #[test]
    fn rejects_garbage_pem() {
        assert!(private_key_from_pem("not a pem").is_err());
    }
}
