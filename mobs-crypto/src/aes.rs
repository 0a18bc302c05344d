//! AES-256-CBC stream transform, as used by the `CryptBufAes` plugin.
//!
//! Ciphertext layout is `IV (16 bytes) ‖ AES-256-CBC(PKCS7(plaintext))` when
//! `write_iv` is set (the default — this is what goes over the wire inside a
//! `CipherValue`). With `write_iv` cleared, the caller supplies the IV out of
//! band (used for the `in_byte_stream`/`out_byte_stream` attachment filter,
//! which derives its IV the same way but tracks it alongside the stream).

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Errors from the AES-256-CBC transform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Ciphertext shorter than one IV-plus-block.
    InvalidBuffer,
    /// PKCS7 unpadding failed — wrong key or corrupted ciphertext.
    BadPadding,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "ciphertext too short or not block-aligned"),
            Self::BadPadding => write!(f, "PKCS7 padding invalid"),
        }
    }
}
impl std::error::Error for Error {}

const BLOCK: usize = 16;

/// Encrypt `plaintext` with a fresh random IV; returns `IV ‖ ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let mut iv = [0u8; BLOCK];
    getrandom::getrandom(&mut iv).expect("getrandom");
    encrypt_with_iv(plaintext, key, &iv)
}

/// Encrypt `plaintext` under an explicit IV; returns `IV ‖ ciphertext`.
pub fn encrypt_with_iv(plaintext: &[u8], key: &[u8; 32], iv: &[u8; BLOCK]) -> Vec<u8> {
    let enc = Aes256CbcEnc::new(key.into(), iv.into());
    let ct = enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mut out = Vec::with_capacity(BLOCK + ct.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&ct);
    out
}

/// Decrypt `IV ‖ ciphertext` produced by [`encrypt`]/[`encrypt_with_iv`].
pub fn decrypt(framed: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, Error> {
    if framed.len() < BLOCK || (framed.len() - BLOCK) % BLOCK != 0 {
        return Err(Error::InvalidBuffer);
    }
    let iv: [u8; BLOCK] = framed[..BLOCK].try_into().unwrap();
    let mut buf = framed[BLOCK..].to_vec();
    let dec = Aes256CbcDec::new(key.into(), &iv.into());
    let pt = dec
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| Error::BadPadding)?;
    Ok(pt.to_vec())
}
