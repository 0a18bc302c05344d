//! ECDH key agreement on `prime256v1` (NIST P-256).
//!
//! The login handshake exchanges an *ephemeral* public key per §4.5.1/4.5.2;
//! [`Ephemeral`] wraps the one-shot secret and [`EphemeralPublic`] is the
//! value that travels in `KeyInfo/KeyName` (DER, then base64 by the caller).

use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand_core::OsRng;

use crate::sha256;

/// Errors from ECDH key agreement.
#[derive(Debug)]
pub enum Error {
    /// The peer's public key bytes are not a valid SEC1-encoded P-256 point.
    InvalidPublicKey,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPublicKey => write!(f, "invalid P-256 public key encoding"),
        }
    }
}
impl std::error::Error for Error {}

/// A one-shot ECDH secret, generated fresh per §4.5.1 step 2 / §4.5.4 step 1.
pub struct Ephemeral {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl Ephemeral {
    /// Generate a fresh ephemeral key pair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// SEC1 uncompressed encoding of the ephemeral public component —
    /// this is what gets base64-encoded into `Session.info` / `KeyName`.
    pub fn public_der(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Run ECDH against a peer's encoded public key; returns the raw shared
    /// secret (the x-coordinate of the shared point), matching the source's
    /// "shared_secret" before SHA-256.
    pub fn agree_raw(&self, peer_public_der: &[u8]) -> Result<[u8; 32], Error> {
        let peer = PublicKey::from_sec1_bytes(peer_public_der).map_err(|_| Error::InvalidPublicKey)?;
        let shared = self.secret.diffie_hellman(&peer);
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }

    /// Run ECDH and derive the session key directly: `SHA-256(shared_secret)`.
    pub fn derive_session_key(&self, peer_public_der: &[u8]) -> Result<[u8; 32], Error> {
        Ok(sha256(&self.agree_raw(peer_public_der)?))
    }
}

/// A long-term static key pair, used server-side to answer the ephemeral
/// ECDH from a connecting client.
pub struct StaticKeyPair {
    secret: SecretKey,
}

impl StaticKeyPair {
    /// Wrap an already-parsed secret key (see [`crate::keys`] for PEM I/O).
    pub fn from_secret(secret: SecretKey) -> Self {
        Self { secret }
    }

    /// Generate a fresh static key pair (used in tests / key provisioning).
    pub fn generate() -> Self {
        Self { secret: SecretKey::random(&mut OsRng) }
    }

    /// SEC1 uncompressed encoding of the public component.
    pub fn public_der(&self) -> Vec<u8> {
        self.secret.public_key().to_encoded_point(false).as_bytes().to_vec()
    }

    /// Run ECDH against a peer's ephemeral public key and derive the session
    /// key: `SHA-256(shared_secret)`. This is the server side of §4.5.2.
    pub fn derive_session_key(&self, peer_public_der: &[u8]) -> Result<[u8; 32], Error> {
        let peer = PublicKey::from_sec1_bytes(peer_public_der).map_err(|_| Error::InvalidPublicKey)?;
        let shared = p256::ecdh::diffie_hellman(
            self.secret.to_nonzero_scalar(),
            peer.as_affine(),
        );
        Ok(sha256(shared.raw_secret_bytes().as_slice()))
    }

    /// Borrow the underlying secret key (for signing via [`crate::sign`]).
    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}
