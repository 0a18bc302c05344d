use std::fmt;

/// Errors the XML layer can raise, per §4.3/§4.4 and §7.
#[derive(Debug)]
pub enum XmlError {
    /// Malformed markup that is not merely incomplete (bad nesting, missing
    /// `=` in an attribute, unterminated quote at end of a materialized
    /// buffer, etc).
    Malformed(String),
    /// An open element (or accumulated `CipherValue` text) exceeded the
    /// configured `max_element_size` (§4.3).
    ElementTooLarge { limit: usize },
    /// The underlying transport was closed with an element still open.
    SessionEnded,
    /// `EncryptedData` referenced a `KeyName` the caller's `Encrypt`
    /// callback could not resolve to a usable plugin (none of the sibling
    /// `KeyInfo` entries worked either).
    NoUsableKey,
    /// The callback itself reported a failure (e.g. wrong session key).
    Encrypt(String),
    /// Base64/AES decode of a `CipherValue` failed.
    Codec(String),
    /// Caller asked to close a byte stream that was never opened, or similar
    /// API misuse.
    BadState(String),
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed XML: {msg}"),
            Self::ElementTooLarge { limit } => write!(f, "element exceeds max_element_size ({limit} bytes)"),
            Self::SessionEnded => write!(f, "transport closed with an element still open"),
            Self::NoUsableKey => write!(f, "no KeyInfo/KeyName could be resolved to a usable key"),
            Self::Encrypt(msg) => write!(f, "encryption callback failed: {msg}"),
            Self::Codec(msg) => write!(f, "cipher value decode failed: {msg}"),
            Self::BadState(msg) => write!(f, "xml reader/writer misuse: {msg}"),
        }
    }
}

impl std::error::Error for XmlError {}

impl From<mobs_codec::CodecError> for XmlError {
    fn from(e: mobs_codec::CodecError) -> Self {
        Self::Codec(e.to_string())
    }
}
