//! Pluggable transport layer.
//!
//! Implement [`Transport`] over TCP, a `rustls` stream, or any other
//! byte-stream protocol to run the MRPC-EC engine over it. Unlike a
//! length-framed protocol, MRPC-EC's wire format self-delimits through XML
//! tag structure, so `recv` hands back whatever bytes are currently
//! available rather than one complete packet — the engine feeds them to its
//! [`mobs_xml::XmlReader`] and asks again if that wasn't enough.

use std::io::{Read, Write};

/// A full-duplex byte-stream transport.
pub trait Transport {
    /// The error type returned by read/write operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Write `data` to the remote.
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Read whatever is currently available into `buf`, appending to it, and
    /// return the number of bytes appended. `0` means the peer closed the
    /// connection.
    fn recv(&mut self, buf: &mut Vec<u8>) -> Result<usize, Self::Error>;
}

/// Any plain `Read + Write` stream (a `TcpStream`, a `rustls::Stream`, ...)
/// is a [`Transport`] directly.
impl<T: Read + Write> Transport for T {
    type Error = std::io::Error;

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.write_all(data)
    }

    fn recv(&mut self, buf: &mut Vec<u8>) -> Result<usize, Self::Error> {
        let mut chunk = [0u8; 4096];
        let n = self.read(&mut chunk)?;
        buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }
}
