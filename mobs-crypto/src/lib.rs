//! Cryptographic primitives for MRPC-EC.
//!
//! Provides:
//! - AES-256-CBC encrypt/decrypt with a prepended IV ([`aes`])
//! - ECDH key agreement on `prime256v1` ([`ecdh`])
//! - digest sign/verify over the derived session key ([`sign`])
//! - SHA-256 hashing ([`sha256`])
//! - PEM key encoding helpers ([`keys`])

#![deny(unsafe_code)]

pub mod aes;
pub mod ecdh;
pub mod keys;
mod sha;
pub mod sign;

pub use ecdh::{Ephemeral, StaticKeyPair};
pub use sha::sha256;
