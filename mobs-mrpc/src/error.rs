//! Engine error taxonomy (§7). Every variant corresponds to one of the five
//! categories the spec names; the engine never swallows an error silently —
//! it either surfaces through [`crate::engine::MrpcEc::get_result`] or aborts
//! the conversation by transitioning to `Closing`.

use std::fmt;

/// Errors raised by the session engine.
#[derive(Debug)]
pub enum EngineError {
    /// Malformed XML, oversized element, missing delimiter, unexpected tag
    /// during handshake.
    Protocol(String),
    /// Unknown `keyId`, signature mismatch.
    AuthFailed(String),
    /// Expired session, rejected reuse. Carries the reserved error token
    /// (`KEY_EXPIRED`, `PLS_RELOG`) when the peer supplied one.
    KeyLifecycle(String),
    /// AES padding failure, base64 garbage, or any other transform-layer
    /// rejection surfaced from `mobs-codec`/`mobs-xml`.
    Transform(String),
    /// The peer sent `MrpcSessionReturnError` with free-form application
    /// text not matching a recognized reserved token.
    RemoteError(String),
    /// The transport's `send`/`recv` returned an error.
    Transport(String),
    /// An operation was attempted in a state that does not permit it (e.g.
    /// `client_refresh_key` before `Connected`).
    WrongState { attempted: &'static str, state: &'static str },
    /// The object model rejected a field (used when decoding into `Record`).
    Model(mobs_types::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::AuthFailed(msg) => write!(f, "authentication failed: {msg}"),
            Self::KeyLifecycle(msg) => write!(f, "key lifecycle error: {msg}"),
            Self::Transform(msg) => write!(f, "transform error: {msg}"),
            Self::RemoteError(msg) => write!(f, "remote error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::WrongState { attempted, state } => {
                write!(f, "cannot {attempted} while in state {state}")
            }
            Self::Model(e) => write!(f, "object model error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<mobs_xml::XmlError> for EngineError {
    fn from(e: mobs_xml::XmlError) -> Self {
        match e {
            mobs_xml::XmlError::Malformed(m) => Self::Protocol(m),
            mobs_xml::XmlError::ElementTooLarge { limit } => {
                Self::Protocol(format!("element exceeds {limit} byte cap"))
            }
            mobs_xml::XmlError::SessionEnded => Self::Protocol("session ended mid-element".to_string()),
            mobs_xml::XmlError::NoUsableKey => Self::Transform("no usable decryption key".to_string()),
            mobs_xml::XmlError::Encrypt(m) => Self::Transform(m),
            mobs_xml::XmlError::Codec(m) => Self::Transform(m),
            mobs_xml::XmlError::BadState(m) => Self::Protocol(m),
        }
    }
}

impl From<mobs_types::Error> for EngineError {
    fn from(e: mobs_types::Error) -> Self {
        Self::Model(e)
    }
}

/// Reserved leading tokens of `MrpcSessionReturnError.error` (§4.5.6, §6.1).
pub const KEY_EXPIRED: &str = "KEY_EXPIRED";
pub const PLS_RELOG: &str = "PLS_RELOG";
