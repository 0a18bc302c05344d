//! Digest sign/verify — proves possession of the client's long-term private
//! key over the freshly derived session key (§4.5.1 step 5, §4.5.2).

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{PublicKey, SecretKey};

/// Errors from signature creation/verification.
#[derive(Debug)]
pub enum Error {
    /// The signature bytes are not a valid DER/fixed-size ECDSA signature.
    MalformedSignature,
    /// Signature verification failed — wrong key or tampered session key.
    VerificationFailed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedSignature => write!(f, "malformed ECDSA signature"),
            Self::VerificationFailed => write!(f, "signature verification failed"),
        }
    }
}
impl std::error::Error for Error {}

/// `auth = Sign(priv_key, session_key)` — the client-side half of §4.5.1 step 5.
pub fn sign(priv_key: &SecretKey, message: &[u8]) -> Vec<u8> {
    let signing_key = SigningKey::from(priv_key);
    let sig: Signature = signing_key.sign(message);
    sig.to_der().as_bytes().to_vec()
}

/// `digest_verify(session_key, auth, client_pub_key)` — the server-side half
/// of §4.5.2. `sig` is the DER encoding produced by [`sign`].
pub fn verify(pub_key: &PublicKey, message: &[u8], sig: &[u8]) -> Result<(), Error> {
    let verifying_key = VerifyingKey::from(pub_key);
    let signature = Signature::from_der(sig).map_err(|_| Error::MalformedSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| Error::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::elliptic_curve::rand_core::OsRng;

    #[test]
    fn sign_then_verify_ok() {
        let sk = SecretKey::random(&mut OsRng);
        let pk = sk.public_key();
        let msg = b"session-key-bytes-32-long-ish!!";
        let sig = sign(&sk, msg);
        verify(&pk, msg, &sig).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let sk = SecretKey::random(&mut OsRng);
        let other = SecretKey::random(&mut OsRng).public_key();
        let msg = b"session-key-bytes";
        let sig = sign(&sk, msg);
        assert!(verify(&other, msg, &sig).is_err());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let sk = SecretKey::random(&mut OsRng);
        let pk = sk.public_key();
        let sig = sign(&sk, b"original message");
        assert!(verify(&pk, b"different message", &sig).is_err());
    }
}
