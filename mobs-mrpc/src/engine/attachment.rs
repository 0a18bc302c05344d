//! Attachment byte streams (§3.4, §4.5.7): a raw-byte substream spliced into
//! the otherwise textual XML stream. A single byte `0x80` (which cannot
//! appear in valid UTF-8) precedes the payload and terminates the enclosing
//! text region; exactly `length` bytes follow, advised out-of-band by the
//! preceding application message (§3.4), encrypted under a fresh IV embedded
//! in the ciphertext (§6.1: "ciphertext whose first 16 bytes are the IV" —
//! so the plugin keeps its default `write_iv` behavior; nothing here needs
//! `AesCryptBuf::set_write_iv(false)`).
//!
//! The handshake/steady-state pump in [`super::MrpcEc`] drives `XmlReader`
//! one event at a time and is fully non-blocking-aware; an attachment, by
//! contract, only ever starts while that pump is quiescent (§4.3: "the outer
//! wide parser must be quiescent while the raw stream is live"), so reading
//! one back is implemented as a simpler blocking loop directly against
//! [`super::Transport`] rather than routed through `XmlReader`.

use std::io::Write;

use mobs_codec::AesCryptBuf;
use mobs_xml::XmlWriter;

use super::Transport;
use crate::error::EngineError;

/// Encrypt `data` under `session_key` and write it as a byte-stream body
/// (`0x80` followed by the base64 ciphertext) via `writer` —
/// `out_byte_stream` and `close_byte_stream` collapsed into one call to
/// match [`XmlWriter::byte_stream`]'s whole-buffer contract. Returns the
/// ciphertext byte count (IV + PKCS7-padded body), mirroring what
/// `close_byte_stream` reports in the source.
pub fn write_attachment<W: Write>(
    writer: &mut XmlWriter<W>,
    session_key: [u8; 32],
    key_name: &str,
    data: &[u8],
) -> Result<usize, EngineError> {
    let mut plugin = AesCryptBuf::new(session_key, key_name.to_string());
    writer.byte_stream(data, &mut plugin)?;
    Ok(ciphertext_len(data.len()))
}

/// IV (16 bytes) plus PKCS7-padded body, matching `AesCryptBuf`'s framing.
fn ciphertext_len(plaintext_len: usize) -> usize {
    16 + (plaintext_len / 16 + 1) * 16
}

/// How many base64 characters (padding included, whitespace excluded)
/// [`mobs_codec::base64::encode_wrapped`] emits for `byte_len` input bytes.
fn base64_char_count(byte_len: usize) -> usize {
    byte_len.div_ceil(3) * 4
}

/// Read an attachment written by [`write_attachment`]: pull raw bytes from
/// `transport` into `pending` until the leading `0x80` delimiter is seen,
/// then read exactly as much base64 text as `plaintext_len` bytes of
/// ciphertext encode to (§3.4/§4.5.7: length is advised out-of-band by the
/// preceding application message — callers get it from there, e.g. a
/// `length` field on their own message type), base64 decode it, and decrypt
/// under `session_key`.
///
/// `pending` is the same raw-byte carry-over buffer the caller's `XmlReader`
/// pump otherwise feeds from — any bytes already read past the end of the
/// preceding application message belong here before the first call.
pub fn read_attachment<T: Transport>(
    transport: &mut T,
    session_key: [u8; 32],
    pending: &mut Vec<u8>,
    plaintext_len: usize,
) -> Result<Vec<u8>, EngineError> {
    while pending.is_empty() {
        let n = transport.recv(pending).map_err(|e| EngineError::Transport(e.to_string()))?;
        if n == 0 {
            return Err(EngineError::Protocol("transport closed mid-attachment".to_string()));
        }
    }
    if pending.remove(0) != 0x80 {
        return Err(EngineError::Protocol("attachment missing leading 0x80 delimiter".to_string()));
    }

    let want_chars = base64_char_count(ciphertext_len(plaintext_len));
    let mut body = Vec::with_capacity(want_chars);
    loop {
        while !pending.is_empty() && body.len() < want_chars {
            let b = pending.remove(0);
            if !b.is_ascii_whitespace() {
                body.push(b);
            }
        }
        if body.len() >= want_chars {
            break;
        }
        let n = transport.recv(pending).map_err(|e| EngineError::Transport(e.to_string()))?;
        if n == 0 {
            return Err(EngineError::Protocol("transport closed mid-attachment".to_string()));
        }
    }

    let text = std::str::from_utf8(&body)
        .map_err(|_| EngineError::Transform("attachment body is not valid UTF-8".to_string()))?;
    let ciphertext = mobs_codec::base64::decode_tolerant(text).map_err(|e| EngineError::Transform(e.to_string()))?;
    let mut plugin = AesCryptBuf::new(session_key, "attachment");
    plugin.underflow(&ciphertext);
    plugin.finalize_in().map_err(|e| EngineError::Transform(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemTransport {
        inbound: std::collections::VecDeque<u8>,
    }

    impl Transport for MemTransport {
        type Error = std::io::Error;

        fn send(&mut self, _data: &[u8]) -> Result<(), Self::Error> {
            Ok(())
        }

        fn recv(&mut self, buf: &mut Vec<u8>) -> Result<usize, Self::Error> {
            let mut n = 0;
            while let Some(b) = self.inbound.pop_front() {
                buf.push(b);
                n += 1;
                if n >= 64 {
                    break;
                }
            }
            Ok(n)
        }
    }

    #[test]
    fn write_then_read_roundtrips() {
        let key = [7u8; 32];
        let data = b"attachment payload bytes".to_vec();
        let mut buf = Vec::new();
        let n = {
            let mut w = XmlWriter::new(&mut buf);
            write_attachment(&mut w, key, "sess-1", &data).unwrap()
        };
        assert_eq!(n, 16 + (data.len() / 16 + 1) * 16);

        let mut transport = MemTransport { inbound: buf.into_iter().collect() };
        let mut pending = Vec::new();
        let read_back = read_attachment(&mut transport, key, &mut pending, data.len()).unwrap();
        assert_eq!(read_back, data);
    }
}
