//! `CryptBufBase` — the pluggable transform a [`crate::wide_buf`] chain owns.
//!
//! A plugin buffers whatever is pushed through `overflow`/`underflow` and
//! performs the actual transform when the chain is flushed — exactly once
//! per encryption frame, since §4.5.3 guarantees one message per frame. This
//! keeps the transform itself (AES-256-CBC) a simple, auditable whole-buffer
//! operation while still presenting the chunked push/pull contract §4.1
//! describes.

/// Errors from a crypt-buffer transform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// The underlying AES transform rejected the ciphertext (bad key/padding).
    Transform(String),
    /// A read/write was attempted after the buffer entered its sticky bad state.
    BadState,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transform(msg) => write!(f, "transform failed: {msg}"),
            Self::BadState => write!(f, "buffer is in sticky bad state"),
        }
    }
}
impl std::error::Error for CodecError {}

/// Contract every stream-buffer plugin (currently only AES-256-CBC) satisfies.
pub trait CryptBufBase: Send {
    /// Stable plugin name, used for logging / `EncryptionMethod` selection.
    fn name(&self) -> &'static str;

    /// Number of recipients this plugin addresses (§4.1). `1` for a plain
    /// symmetric session; >1 is reserved for future multi-recipient use and
    /// is not relied upon per §9 Open Questions.
    fn recipients(&self) -> usize {
        1
    }

    /// Opaque id of recipient `i` (maps to `KeyInfo/KeyName` when present).
    fn recipient_id(&self, _index: usize) -> Option<String> {
        None
    }

    /// Base64 key material for recipient `i`, when the plugin carries one.
    fn recipient_key_base64(&self, _index: usize) -> Option<String> {
        None
    }

    /// Feed outgoing plaintext into the buffer.
    fn overflow(&mut self, plaintext: &[u8]);

    /// Feed incoming ciphertext into the buffer.
    fn underflow(&mut self, ciphertext: &[u8]);

    /// Finish the outgoing transform: pad, encrypt, and return the ciphertext
    /// accumulated via [`overflow`](Self::overflow). Idempotent — calling it
    /// again returns an empty vec.
    fn finalize_out(&mut self) -> Vec<u8>;

    /// Finish the incoming transform: decrypt everything accumulated via
    /// [`underflow`](Self::underflow). Idempotent — calling it again after a
    /// success returns `Ok(vec![])`; after a failure it stays in the bad
    /// state and keeps returning the same error.
    fn finalize_in(&mut self) -> Result<Vec<u8>, CodecError>;
}

/// AES-256-CBC plugin. Ciphertext is `IV ‖ AES-256-CBC(PKCS7(plaintext))`
/// when `write_iv` is set (the default, and the only mode the wire format
/// §6.1 uses: the IV always travels inside `CipherValue`).
pub struct AesCryptBuf {
    key: [u8; 32],
    key_name: String,
    write_iv: bool,
    out_buf: Vec<u8>,
    out_done: bool,
    in_buf: Vec<u8>,
    bad: bool,
}

impl AesCryptBuf {
    /// Construct a plugin bound to `key`, tagging outgoing frames with
    /// `key_name` (the `KeyInfo/KeyName` value: either the session-key name
    /// or the base64 ephemeral public key, per §6.1).
    pub fn new(key: [u8; 32], key_name: impl Into<String>) -> Self {
        Self {
            key,
            key_name: key_name.into(),
            write_iv: true,
            out_buf: Vec::new(),
            out_done: false,
            in_buf: Vec::new(),
            bad: false,
        }
    }

    /// The `KeyInfo/KeyName` this plugin was constructed with.
    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Disable IV-prepending on output; the caller then takes responsibility
    /// for tracking the IV itself. Unused by anything in this workspace today
    /// — the attachment byte-stream keeps the default (`true`) behavior, see
    /// `mobs_mrpc::engine::attachment`.
    pub fn set_write_iv(&mut self, on: bool) {
        self.write_iv = on;
    }
}

impl CryptBufBase for AesCryptBuf {
    fn name(&self) -> &'static str {
        "aes-256-cbc"
    }

    fn recipient_id(&self, index: usize) -> Option<String> {
        (index == 0).then(|| self.key_name.clone())
    }

    fn overflow(&mut self, plaintext: &[u8]) {
        self.out_buf.extend_from_slice(plaintext);
    }

    fn underflow(&mut self, ciphertext: &[u8]) {
        self.in_buf.extend_from_slice(ciphertext);
    }

    fn finalize_out(&mut self) -> Vec<u8> {
        if self.out_done {
            return Vec::new();
        }
        self.out_done = true;
        if self.write_iv {
            mobs_crypto::aes::encrypt(&self.out_buf, &self.key)
        } else {
            // Still generate a fresh IV, just don't prepend it to the
            // returned ciphertext; the caller tracks it out of band.
            let framed = mobs_crypto::aes::encrypt(&self.out_buf, &self.key);
            framed[16..].to_vec()
        }
    }

    fn finalize_in(&mut self) -> Result<Vec<u8>, CodecError> {
        if self.bad {
            return Err(CodecError::BadState);
        }
        if self.in_buf.is_empty() {
            return Ok(Vec::new());
        }
        let buf = std::mem::take(&mut self.in_buf);
        match mobs_crypto::aes::decrypt(&buf, &self.key) {
            Ok(pt) => Ok(pt),
            Err(e) => {
                self.bad = true;
                log::warn!("AES decrypt failed for key `{}`: {e}", self.key_name);
                Err(CodecError::Transform(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_via_plugin_pair() {
        let key = [42u8; 32];
        let mut writer = AesCryptBuf::new(key, "sess-1");
        writer.overflow(b"hello, ");
        writer.overflow(b"world");
        let wire = writer.finalize_out();

        let mut reader = AesCryptBuf::new(key, "sess-1");
        reader.underflow(&wire);
        let pt = reader.finalize_in().unwrap();
        assert_eq!(pt, b"hello, world");
    }

    #[test]
    fn finalize_out_is_idempotent() {
        let mut writer = AesCryptBuf::new([1u8; 32], "k");
        writer.overflow(b"data");
        let first = writer.finalize_out();
        assert!(!first.is_empty());
        assert!(writer.finalize_out().is_empty());
    }

    #[test]
    fn bad_ciphertext_enters_sticky_state() {
        let mut reader = AesCryptBuf::new([9u8; 32], "k");
        reader.underflow(&[0u8; 20]); // not a multiple of the block size after IV
        assert!(reader.finalize_in().is_err());
        assert!(reader.finalize_in().is_err(), "must stay sticky");
    }
}
