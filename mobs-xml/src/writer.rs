//! Streaming XML writer (§4.4): a thin, ordered sequence of `write_*` calls
//! that assemble well-formed markup directly onto a `Write` sink, plus
//! `start_encrypt`/`stop_encrypt` to splice an `EncryptedData` subtree in
//! place of whatever was written between the two calls.

use std::io::{self, Write};

use mobs_codec::CryptBufBase;

use crate::entities;
use crate::error::XmlError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum TagState {
    /// No tag currently open for attribute-writing.
    None,
    /// `<Name` written, `>` not yet emitted — attributes still legal.
    Open,
}

pub struct XmlWriter<W: Write> {
    inner: W,
    tag_state: TagState,
    /// Set while `start_encrypt`/`stop_encrypt` is capturing a subtree: the
    /// plaintext is buffered here instead of reaching `inner` directly.
    capture: Option<Vec<u8>>,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, tag_state: TagState::None, capture: None }
    }

    pub fn write_head(&mut self) -> Result<(), XmlError> {
        self.raw(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")
    }

    pub fn write_tag_begin(&mut self, name: &str) -> Result<(), XmlError> {
        self.close_open_tag_if_needed()?;
        self.raw(b"<")?;
        self.raw(name.as_bytes())?;
        self.tag_state = TagState::Open;
        Ok(())
    }

    pub fn write_attribute(&mut self, name: &str, value: &str) -> Result<(), XmlError> {
        if self.tag_state != TagState::Open {
            return Err(XmlError::BadState("write_attribute outside an open tag".to_string()));
        }
        self.raw(b" ")?;
        self.raw(name.as_bytes())?;
        self.raw(b"=\"")?;
        self.raw(entities::encode(value).as_bytes())?;
        self.raw(b"\"")?;
        Ok(())
    }

    pub fn write_value(&mut self, text: &str) -> Result<(), XmlError> {
        self.close_open_tag_if_needed()?;
        self.raw(entities::encode(text).as_bytes())
    }

    pub fn write_cdata(&mut self, text: &str) -> Result<(), XmlError> {
        self.close_open_tag_if_needed()?;
        self.raw(b"<![CDATA[")?;
        self.raw(text.replace("]]>", "]]]]><![CDATA[>").as_bytes())?;
        self.raw(b"]]>")
    }

    pub fn write_base64(&mut self, data: &[u8]) -> Result<(), XmlError> {
        self.close_open_tag_if_needed()?;
        self.raw(mobs_codec::base64::encode_wrapped(data).as_bytes())
    }

    pub fn write_tag_end(&mut self, name: &str) -> Result<(), XmlError> {
        match self.tag_state {
            TagState::Open => {
                self.raw(b"/>")?;
                self.tag_state = TagState::None;
            }
            TagState::None => {
                self.raw(b"</")?;
                self.raw(name.as_bytes())?;
                self.raw(b">")?;
            }
        }
        Ok(())
    }

    pub fn write_comment(&mut self, text: &str) -> Result<(), XmlError> {
        self.close_open_tag_if_needed()?;
        self.raw(b"<!--")?;
        self.raw(text.replace("--", "- -").as_bytes())?;
        self.raw(b"-->")
    }

    /// Begin capturing everything written until [`Self::stop_encrypt`]; the
    /// capture becomes the `CipherValue` plaintext.
    pub fn start_encrypt(&mut self) -> Result<(), XmlError> {
        self.close_open_tag_if_needed()?;
        if self.capture.is_some() {
            return Err(XmlError::BadState("start_encrypt while already encrypting".to_string()));
        }
        self.capture = Some(Vec::new());
        Ok(())
    }

    /// Finish capturing, encrypt the captured subtree through `plugin`, and
    /// emit the `EncryptedData` wrapper (§6.1) with `key_name` as
    /// `KeyInfo/KeyName`.
    pub fn stop_encrypt(&mut self, key_name: &str, plugin: &mut dyn CryptBufBase) -> Result<(), XmlError> {
        let captured = self
            .capture
            .take()
            .ok_or_else(|| XmlError::BadState("stop_encrypt without start_encrypt".to_string()))?;
        let cipher_text = mobs_codec::frame::encrypt_frame(&captured, plugin);

        self.write_tag_begin("EncryptedData")?;
        self.write_tag_end_open_only()?;
        self.write_tag_begin("EncryptionMethod")?;
        self.write_attribute("Algorithm", "http://www.w3.org/2001/04/xmlenc#aes-256-cbc")?;
        self.write_tag_end("EncryptionMethod")?;
        self.write_tag_begin("KeyInfo")?;
        self.write_tag_end_open_only()?;
        self.write_tag_begin("KeyName")?;
        self.write_tag_end_open_only()?;
        self.write_value(key_name)?;
        self.write_tag_end("KeyName")?;
        self.write_tag_end("KeyInfo")?;
        self.write_tag_begin("CipherData")?;
        self.write_tag_end_open_only()?;
        self.write_tag_begin("CipherValue")?;
        self.write_tag_end_open_only()?;
        self.write_value(&cipher_text)?;
        self.write_tag_end("CipherValue")?;
        self.write_tag_end("CipherData")?;
        self.write_tag_end("EncryptedData")?;
        Ok(())
    }

    /// Write a length-framed, base64-wrapped attachment body (§4.5.7),
    /// encrypting it through `plugin` as it goes.
    pub fn byte_stream(&mut self, data: &[u8], plugin: &mut dyn CryptBufBase) -> Result<(), XmlError> {
        self.close_open_tag_if_needed()?;
        plugin.overflow(data);
        let ciphertext = plugin.finalize_out();
        self.raw(b"\x80")?;
        self.raw(mobs_codec::base64::encode_wrapped(&ciphertext).as_bytes())
    }

    pub fn flush(&mut self) -> Result<(), XmlError> {
        self.inner.flush().map_err(io_err)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn write_tag_end_open_only(&mut self) -> Result<(), XmlError> {
        debug_assert_eq!(self.tag_state, TagState::Open);
        self.raw(b">")?;
        self.tag_state = TagState::None;
        Ok(())
    }

    fn close_open_tag_if_needed(&mut self) -> Result<(), XmlError> {
        if self.tag_state == TagState::Open {
            self.raw(b">")?;
            self.tag_state = TagState::None;
        }
        Ok(())
    }

    fn raw(&mut self, bytes: &[u8]) -> Result<(), XmlError> {
        if let Some(buf) = self.capture.as_mut() {
            buf.extend_from_slice(bytes);
            Ok(())
        } else {
            self.inner.write_all(bytes).map_err(io_err)
        }
    }
}

fn io_err(e: io::Error) -> XmlError {
    XmlError::BadState(format!("write failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{XmlEvent, XmlReader};
    use mobs_codec::AesCryptBuf;

    #[test]
    fn writes_a_simple_element() {
        let mut buf = Vec::new();
        let mut w = XmlWriter::new(&mut buf);
        w.write_tag_begin("Person").unwrap();
        w.write_attribute("id", "7").unwrap();
        w.write_tag_begin("name").unwrap();
        w.write_value("A & B").unwrap();
        w.write_tag_end("name").unwrap();
        w.write_tag_end("Person").unwrap();
        w.flush().unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "<Person id=\"7\"><name>A &amp; B</name></Person>"
        );
    }

    #[test]
    fn self_closing_when_no_value_written() {
        let mut buf = Vec::new();
        let mut w = XmlWriter::new(&mut buf);
        w.write_tag_begin("Empty").unwrap();
        w.write_tag_end("Empty").unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "<Empty/>");
    }

    #[test]
    fn start_stop_encrypt_round_trips_through_reader() {
        let key = [3u8; 32];
        let mut buf = Vec::new();
        {
            let mut w = XmlWriter::new(&mut buf);
            w.write_tag_begin("Envelope").unwrap();
            w.write_tag_end_open_only().unwrap();
            w.start_encrypt().unwrap();
            w.write_tag_begin("Inner").unwrap();
            w.write_value("secret").unwrap();
            w.write_tag_end("Inner").unwrap();
            let mut plugin = AesCryptBuf::new(key, "sess-z");
            w.stop_encrypt("sess-z", &mut plugin).unwrap();
            w.write_tag_end("Envelope").unwrap();
        }

        let mut r = XmlReader::new();
        r.set_encrypt_resolver(move |_: &str, key_name: &str| {
            if key_name == "sess-z" {
                Ok(Box::new(AesCryptBuf::new(key, "sess-z")) as Box<dyn CryptBufBase>)
            } else {
                Err(XmlError::NoUsableKey)
            }
        });
        r.feed(&buf);
        r.mark_closed();

        let mut events = Vec::new();
        while let Some(ev) = r.poll_event().unwrap() {
            let done = ev == XmlEvent::Eof;
            events.push(ev);
            if done {
                break;
            }
        }
        assert_eq!(
            events,
            vec![
                XmlEvent::StartTag { name: "Envelope".into(), attrs: vec![], self_closing: false },
                XmlEvent::StartTag { name: "Inner".into(), attrs: vec![], self_closing: false },
                XmlEvent::Text("secret".into()),
                XmlEvent::EndTag { name: "Inner".into() },
                XmlEvent::EncryptionFinished,
                XmlEvent::EndTag { name: "Envelope".into() },
                XmlEvent::Eof,
            ]
        );
    }
}
