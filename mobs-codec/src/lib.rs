//! Chunked stream buffers between the raw byte transport and the XML layer.
//!
//! - [`base64`] — 60-column wrapped base64 encode/decode.
//! - [`crypt_buf`] — the `CryptBufBase` plugin contract and its AES-256-CBC
//!   implementation.
//! - [`frame`] — "one encryption frame" convenience built from the two above.
//! - [`wide_buf`] — byte-stream readers/writers with read-limit and
//!   delimiter controls (used directly by the attachment stream).
//! - [`pushback`] — single-byte lookahead `Read` adapter `wide_buf` relies on.

#![deny(unsafe_code)]

pub mod base64;
pub mod crypt_buf;
pub mod frame;
pub mod pushback;
pub mod wide_buf;

pub use crypt_buf::{AesCryptBuf, CodecError, CryptBufBase};
pub use wide_buf::{CryptIstrBuf, CryptOstrBuf};
