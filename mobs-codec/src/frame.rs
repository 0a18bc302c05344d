//! High-level "one encryption frame" helpers built on [`crate::crypt_buf`].
//!
//! An encryption frame is exactly one `CipherValue` body: plaintext goes in
//! one end, base64-wrapped ciphertext text comes out the other (and back).
//! `mobs-xml` calls these at `start_encrypt`/`EncryptedData` boundaries; they
//! are the concrete realization of the plugin hot-swap described in §4.2/§9.

use crate::base64;
use crate::crypt_buf::{CodecError, CryptBufBase};

/// Encrypt `plaintext` through `plugin` and base64-wrap the result — the
/// text that belongs inside `CipherData/CipherValue`.
pub fn encrypt_frame(plaintext: &[u8], plugin: &mut dyn CryptBufBase) -> String {
    plugin.overflow(plaintext);
    let ciphertext = plugin.finalize_out();
    base64::encode_wrapped(&ciphertext)
}

/// Decode and decrypt a `CipherValue` body back to plaintext.
pub fn decrypt_frame(cipher_value_text: &str, plugin: &mut dyn CryptBufBase) -> Result<Vec<u8>, CodecError> {
    let ciphertext = base64::decode_tolerant(cipher_value_text)
        .map_err(|e| CodecError::Transform(e.to_string()))?;
    plugin.underflow(&ciphertext);
    plugin.finalize_in()
}
