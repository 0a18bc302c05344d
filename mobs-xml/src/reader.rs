//! [`XmlReader`] — the xmlenc-aware façade over [`crate::raw::RawTokenizer`].
//!
//! Consumers never see the `EncryptedData`/`EncryptionMethod`/`KeyInfo`/
//! `CipherData`/`CipherValue` scaffolding (§4.3, wire format §6.1): once a
//! `CipherValue` body is fully buffered, the registered `Encrypt` callback is
//! asked for a plugin, the frame is decrypted via
//! [`mobs_codec::frame::decrypt_frame`], and the resulting plaintext is
//! pushed onto the tokenizer as a nested source. Events then stream out of
//! that nested source exactly like top-level ones, terminated by
//! [`XmlEvent::EncryptionFinished`] once it's drained.

use mobs_codec::CryptBufBase;

use crate::error::XmlError;
use crate::raw::{Poll as RawPoll, RawEvent, RawTokenizer};

const DEFAULT_MAX_ELEMENT_SIZE: usize = 256 * 1024 * 1024;
/// §4.3: a tighter cap applies while the handshake (unauthenticated,
/// un-sessioned) is in flight.
pub const HANDSHAKE_MAX_ELEMENT_SIZE: usize = 4 * 1024;

const ALGORITHM_AES_256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes-256-cbc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    StartTag { name: String, attrs: Vec<(String, String)>, self_closing: bool },
    Text(String),
    EndTag { name: String },
    /// The nested plaintext of an `EncryptedData` subtree has been fully
    /// replayed as ordinary events; parsing resumes on the outer stream.
    EncryptionFinished,
    Eof,
}

/// Resolves a `KeyInfo/KeyName` (plus the negotiated algorithm and the raw
/// `CipherValue` text) to a plugin able to decrypt it. Returning `Err` for
/// one `KeyName` lets the reader try the next sibling, per §9's Open
/// Question on multiple `KeyInfo` entries: only the first usable one wins.
pub trait EncryptResolver: Send {
    fn resolve(
        &mut self,
        algorithm: &str,
        key_name: &str,
    ) -> Result<Box<dyn CryptBufBase>, XmlError>;
}

impl<F> EncryptResolver for F
where
    F: FnMut(&str, &str) -> Result<Box<dyn CryptBufBase>, XmlError> + Send,
{
    fn resolve(&mut self, algorithm: &str, key_name: &str) -> Result<Box<dyn CryptBufBase>, XmlError> {
        self(algorithm, key_name)
    }
}

#[derive(Default)]
struct EncCtx {
    algorithm: Option<String>,
    key_names: Vec<String>,
    cipher_text: Option<String>,
}

enum Mode {
    Normal,
    /// Inside `<EncryptedData>`, tracking which scaffold element is open via
    /// a small name stack relative to the subtree root.
    InEncryptedData { depth: usize, path: Vec<String>, ctx: EncCtx, text_buf: String },
}

pub struct XmlReader {
    raw: RawTokenizer,
    mode: Mode,
    resolver: Option<Box<dyn EncryptResolver>>,
}

impl XmlReader {
    pub fn new() -> Self {
        Self {
            raw: RawTokenizer::new(DEFAULT_MAX_ELEMENT_SIZE),
            mode: Mode::Normal,
            resolver: None,
        }
    }

    pub fn set_max_element_size(&mut self, n: usize) {
        self.raw.set_max_element_size(n);
    }

    pub fn set_encrypt_resolver(&mut self, resolver: impl EncryptResolver + 'static) {
        self.resolver = Some(Box::new(resolver));
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.raw.feed(bytes);
    }

    pub fn mark_closed(&mut self) {
        self.raw.mark_closed();
    }

    /// Reclaim transport bytes already fed in but not yet consumed as XML
    /// events — the handoff point for a raw attachment substream (§3.4,
    /// §4.5.7), which by contract only ever starts between elements, never
    /// inside a decrypted `EncryptedData` subtree.
    pub fn take_unconsumed(&mut self) -> Vec<u8> {
        self.raw.take_unconsumed()
    }

    /// Pull the next event, or `Ok(None)` if more transport bytes are needed
    /// before one can be produced (non-blocking §9 contract).
    pub fn poll_event(&mut self) -> Result<Option<XmlEvent>, XmlError> {
        loop {
            let raw_ev = match self.raw.poll()? {
                RawPoll::Pending => return Ok(None),
                RawPoll::Ready(ev) => ev,
            };

            match (&mut self.mode, raw_ev) {
                (Mode::Normal, RawEvent::StartTag { name, attrs, self_closing }) => {
                    if name == "EncryptedData" {
                        self.mode = Mode::InEncryptedData {
                            depth: 0,
                            path: Vec::new(),
                            ctx: EncCtx::default(),
                            text_buf: String::new(),
                        };
                        continue;
                    }
                    return Ok(Some(XmlEvent::StartTag { name, attrs, self_closing }));
                }
                (Mode::Normal, RawEvent::Text(t)) => return Ok(Some(XmlEvent::Text(t))),
                (Mode::Normal, RawEvent::EndTag { name }) => return Ok(Some(XmlEvent::EndTag { name })),
                (Mode::Normal, RawEvent::SourcePopped) => return Ok(Some(XmlEvent::EncryptionFinished)),
                (Mode::Normal, RawEvent::Eof) => return Ok(Some(XmlEvent::Eof)),

                (Mode::InEncryptedData { .. }, RawEvent::SourcePopped) => {
                    unreachable!("nested source cannot open while still scanning EncryptedData scaffolding")
                }
                (Mode::InEncryptedData { .. }, RawEvent::Eof) => return Ok(Some(XmlEvent::Eof)),

                (Mode::InEncryptedData { depth, path, ctx, text_buf }, RawEvent::StartTag { name, attrs, self_closing }) => {
                    *depth += 1;
                    path.push(name.clone());
                    if name == "EncryptionMethod" {
                        if let Some((_, algo)) = attrs.iter().find(|(k, _)| k == "Algorithm") {
                            ctx.algorithm = Some(algo.clone());
                        }
                    }
                    text_buf.clear();
                    if self_closing {
                        path.pop();
                        *depth -= 1;
                    }
                    continue;
                }
                (Mode::InEncryptedData { text_buf, .. }, RawEvent::Text(t)) => {
                    text_buf.push_str(&t);
                    continue;
                }
                (Mode::InEncryptedData { depth, path, ctx, text_buf }, RawEvent::EndTag { name }) => {
                    debug_assert_eq!(path.last().map(String::as_str), Some(name.as_str()));
                    match name.as_str() {
                        "KeyName" => ctx.key_names.push(std::mem::take(text_buf)),
                        "CipherValue" => ctx.cipher_text = Some(std::mem::take(text_buf)),
                        _ => {}
                    }
                    path.pop();
                    if *depth == 0 {
                        return Err(XmlError::Malformed("EncryptedData underflow".to_string()));
                    }
                    *depth -= 1;

                    if name == "EncryptedData" {
                        let algorithm = ctx.algorithm.clone().unwrap_or_else(|| ALGORITHM_AES_256_CBC.to_string());
                        let cipher_text = ctx
                            .cipher_text
                            .take()
                            .ok_or_else(|| XmlError::Malformed("EncryptedData without CipherValue".to_string()))?;
                        let key_names = std::mem::take(&mut ctx.key_names);
                        let plaintext = self.resolve_and_decrypt(&algorithm, &key_names, &cipher_text)?;
                        self.mode = Mode::Normal;
                        self.raw.push_source(plaintext);
                    }
                    continue;
                }
            }
        }
    }

    fn resolve_and_decrypt(
        &mut self,
        algorithm: &str,
        key_names: &[String],
        cipher_text: &str,
    ) -> Result<Vec<u8>, XmlError> {
        let resolver = self
            .resolver
            .as_mut()
            .ok_or_else(|| XmlError::BadState("no Encrypt resolver registered".to_string()))?;

        let candidates: &[String] = if key_names.is_empty() {
            std::slice::from_ref(&String::new())
        } else {
            key_names
        };

        let mut last_err = None;
        for key_name in candidates {
            match resolver.resolve(algorithm, key_name) {
                Ok(mut plugin) => match mobs_codec::frame::decrypt_frame(cipher_text, &mut *plugin) {
                    Ok(pt) => return Ok(pt),
                    Err(e) => last_err = Some(XmlError::from(e)),
                },
                Err(e) => {
                    log::debug!("KeyInfo/KeyName `{key_name}` not usable, trying next sibling");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(XmlError::NoUsableKey))
    }
}

impl Default for XmlReader {
    fn default() -> Self {
        Self::new()
    }
}
