//! Resumable, allocation-light XML tokenizer.
//!
//! §9's design note replaces the original's callback-driven push parser with
//! a pull one: each [`RawTokenizer::poll`] call consumes as many bytes as are
//! currently available and either returns an event or `Pending` — never
//! blocking, never discarding what it couldn't yet use. [`RawTokenizer::feed`]
//! appends newly-arrived transport bytes; [`RawTokenizer::push_source`] is
//! how the xmlenc-aware layer above (`reader.rs`) substitutes a freshly
//! decrypted plaintext buffer and lets the very same state machine recurse
//! into it, popping back out (`SourcePopped`) at its end.

use std::collections::HashMap;

use crate::entities;
use crate::error::XmlError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    StartTag { name: String, attrs: Vec<(String, String)>, self_closing: bool },
    Text(String),
    EndTag { name: String },
    /// A nested (decrypted) source was fully consumed and popped.
    SourcePopped,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Pending,
    Ready(RawEvent),
}

struct Source {
    buf: Vec<u8>,
    pos: usize,
    /// `true` for a fully-materialized nested buffer (decrypted plaintext):
    /// once exhausted, no more bytes will ever arrive.
    nested: bool,
}

pub struct RawTokenizer {
    stack: Vec<Source>,
    closed: bool,
    max_element_size: usize,
    entities: HashMap<String, String>,
    elem_stack: Vec<String>,
}

impl RawTokenizer {
    pub fn new(max_element_size: usize) -> Self {
        Self {
            stack: vec![Source { buf: Vec::new(), pos: 0, nested: false }],
            closed: false,
            max_element_size,
            entities: HashMap::new(),
            elem_stack: Vec::new(),
        }
    }

    pub fn set_max_element_size(&mut self, n: usize) {
        self.max_element_size = n;
    }

    /// Append bytes arriving from the transport (the outer, bottom source).
    pub fn feed(&mut self, bytes: &[u8]) {
        self.stack[0].buf.extend_from_slice(bytes);
    }

    /// Push a fully-materialized nested source (decrypted `CipherValue`
    /// plaintext); events from it are emitted exactly like top-level ones
    /// until it is exhausted, at which point it pops and `SourcePopped` fires.
    pub fn push_source(&mut self, bytes: Vec<u8>) {
        self.stack.push(Source { buf: bytes, pos: 0, nested: true });
    }

    /// True while any nested (decrypted) source is active.
    pub fn in_nested_source(&self) -> bool {
        self.stack.len() > 1
    }

    /// Mark the transport as closed; a future `poll` on an empty outer
    /// buffer then reports [`XmlError::SessionEnded`] instead of `Pending`.
    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    fn top(&self) -> &Source {
        self.stack.last().expect("stack never empty")
    }

    fn remaining(&self) -> &[u8] {
        let s = self.top();
        &s.buf[s.pos..]
    }

    fn advance(&mut self, n: usize) {
        self.stack.last_mut().expect("stack never empty").pos += n;
    }

    /// Drain and return whatever the outer (transport) source has buffered
    /// past the last event handed out — the bytes a raw, non-XML substream
    /// (an MRPC-EC attachment body) needs back before its own reader can
    /// take over the connection. Only meaningful outside a nested source;
    /// callers are expected to only use this at the top level, between
    /// elements.
    pub fn take_unconsumed(&mut self) -> Vec<u8> {
        let s = &mut self.stack[0];
        let rest = s.buf.split_off(s.pos);
        s.buf.clear();
        s.pos = 0;
        rest
    }

    fn compact_if_large(&mut self) {
        let s = self.stack.last_mut().expect("stack never empty");
        if !s.nested && s.pos > 64 * 1024 {
            s.buf.drain(0..s.pos);
            s.pos = 0;
        }
    }

    pub fn poll(&mut self) -> Result<Poll, XmlError> {
        loop {
            let top_exhausted = self.top().pos >= self.top().buf.len();
            if top_exhausted {
                if self.stack.len() > 1 {
                    self.stack.pop();
                    return Ok(Poll::Ready(RawEvent::SourcePopped));
                }
                return if self.closed {
                    Ok(Poll::Ready(RawEvent::Eof))
                } else {
                    Ok(Poll::Pending)
                };
            }

            let nested = self.top().nested;
            let rem = self.remaining();

            if rem[0] != b'<' {
                match find_subslice(rem, b"<") {
                    Some(j) => {
                        let raw = std::str::from_utf8(&rem[..j])
                            .map_err(|e| XmlError::Malformed(format!("invalid utf-8: {e}")))?
                            .to_string();
                        self.advance(j);
                        self.compact_if_large();
                        let text = entities::decode(&raw, &self.entities)?;
                        if text.is_empty() {
                            continue;
                        }
                        return Ok(Poll::Ready(RawEvent::Text(text)));
                    }
                    None if nested => {
                        let raw = std::str::from_utf8(rem)
                            .map_err(|e| XmlError::Malformed(format!("invalid utf-8: {e}")))?
                            .to_string();
                        let n = rem.len();
                        self.advance(n);
                        let text = entities::decode(&raw, &self.entities)?;
                        if text.is_empty() {
                            continue;
                        }
                        return Ok(Poll::Ready(RawEvent::Text(text)));
                    }
                    None if self.closed && !nested => return Err(XmlError::SessionEnded),
                    None => {
                        self.check_size_budget(rem.len())?;
                        return Ok(Poll::Pending);
                    }
                }
            }

            // Starts with '<': dispatch on the following bytes.
            if rem.starts_with(b"<!--") {
                match find_subslice(&rem[4..], b"-->") {
                    Some(j) => {
                        self.advance(4 + j + 3);
                        self.compact_if_large();
                        continue;
                    }
                    None => return self.pending_or_err(rem.len(), nested),
                }
            }
            if rem.starts_with(b"<![CDATA[") {
                match find_subslice(&rem[9..], b"]]>") {
                    Some(j) => {
                        let raw = std::str::from_utf8(&rem[9..9 + j])
                            .map_err(|e| XmlError::Malformed(format!("invalid utf-8: {e}")))?
                            .to_string();
                        self.advance(9 + j + 3);
                        self.compact_if_large();
                        if raw.is_empty() {
                            continue;
                        }
                        return Ok(Poll::Ready(RawEvent::Text(raw)));
                    }
                    None => return self.pending_or_err(rem.len(), nested),
                }
            }
            if rem.starts_with(b"<?") {
                match find_subslice(&rem[2..], b"?>") {
                    Some(j) => {
                        self.advance(2 + j + 2);
                        self.compact_if_large();
                        continue;
                    }
                    None => return self.pending_or_err(rem.len(), nested),
                }
            }
            if rem.starts_with(b"<!DOCTYPE") || rem.starts_with(b"<!doctype") {
                match scan_doctype(rem) {
                    Some((consumed, subset)) => {
                        if let Some(subset) = subset {
                            for (name, value) in parse_entity_decls(&subset) {
                                self.entities.insert(name, value);
                            }
                        }
                        self.advance(consumed);
                        self.compact_if_large();
                        continue;
                    }
                    None => return self.pending_or_err(rem.len(), nested),
                }
            }
            if rem.starts_with(b"</") {
                match find_subslice(rem, b">") {
                    Some(end) => {
                        let name = std::str::from_utf8(&rem[2..end])
                            .map_err(|e| XmlError::Malformed(format!("invalid utf-8: {e}")))?
                            .trim()
                            .to_string();
                        self.advance(end + 1);
                        self.compact_if_large();
                        match self.elem_stack.pop() {
                            Some(open) if open == name => {}
                            Some(open) => {
                                return Err(XmlError::Malformed(format!(
                                    "end tag </{name}> does not match open element <{open}>"
                                )));
                            }
                            None => {
                                return Err(XmlError::Malformed(format!(
                                    "end tag </{name}> with no open element"
                                )));
                            }
                        }
                        return Ok(Poll::Ready(RawEvent::EndTag { name }));
                    }
                    None => return self.pending_or_err(rem.len(), nested),
                }
            }

            // Opening tag: find the matching unquoted '>'.
            match scan_tag_end(rem) {
                Some(end) => {
                    let self_closing = rem[end - 1] == b'/';
                    let body_end = if self_closing { end - 1 } else { end };
                    let body = std::str::from_utf8(&rem[1..body_end])
                        .map_err(|e| XmlError::Malformed(format!("invalid utf-8: {e}")))?;
                    let (name, attrs) = parse_start_tag(body, &self.entities)?;
                    self.advance(end + 1);
                    self.compact_if_large();
                    if self_closing {
                        // Balanced immediately; caller still gets both events
                        // so it can treat `<Foo/>` identically to `<Foo></Foo>`.
                    } else {
                        self.elem_stack.push(name.clone());
                    }
                    return Ok(Poll::Ready(RawEvent::StartTag { name, attrs, self_closing }));
                }
                None => return self.pending_or_err(rem.len(), nested),
            }
        }
    }

    fn pending_or_err(&mut self, rem_len: usize, nested: bool) -> Result<Poll, XmlError> {
        if nested {
            return Err(XmlError::Malformed("unterminated construct at end of decrypted buffer".to_string()));
        }
        if self.closed {
            return Err(XmlError::SessionEnded);
        }
        self.check_size_budget(rem_len)?;
        Ok(Poll::Pending)
    }

    fn check_size_budget(&self, rem_len: usize) -> Result<(), XmlError> {
        if rem_len > self.max_element_size {
            return Err(XmlError::ElementTooLarge { limit: self.max_element_size });
        }
        Ok(())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Find the index of the `>` that closes an opening tag, honoring quoted
/// attribute values (a `>` inside `"..."`/`'...'` does not count).
fn scan_tag_end(rem: &[u8]) -> Option<usize> {
    let mut quote: Option<u8> = None;
    let mut i = 1; // skip leading '<'
    while i < rem.len() {
        let b = rem[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

/// Scan a `<!DOCTYPE ...>` (optionally with an internal subset in `[...]`),
/// returning the consumed byte count and the subset text if present.
fn scan_doctype(rem: &[u8]) -> Option<(usize, Option<String>)> {
    let mut depth = 0usize;
    let mut subset_start = None;
    let mut subset_end = None;
    let mut i = 9; // len("<!DOCTYPE")
    while i < rem.len() {
        match rem[i] {
            b'[' => {
                if depth == 0 {
                    subset_start = Some(i + 1);
                }
                depth += 1;
            }
            b']' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        subset_end = Some(i);
                    }
                }
            }
            b'>' if depth == 0 => {
                let subset = match (subset_start, subset_end) {
                    (Some(s), Some(e)) => std::str::from_utf8(&rem[s..e]).ok().map(|s| s.to_string()),
                    _ => None,
                };
                return Some((i + 1, subset));
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn parse_entity_decls(subset: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = subset;
    while let Some(start) = rest.find("<!ENTITY") {
        let after = &rest[start + "<!ENTITY".len()..];
        let Some(end) = after.find('>') else { break };
        let decl = after[..end].trim();
        if let Some((name, value)) = parse_one_entity_decl(decl) {
            out.push((name, value));
        }
        rest = &after[end + 1..];
    }
    out
}

fn parse_one_entity_decl(decl: &str) -> Option<(String, String)> {
    let mut parts = decl.splitn(2, char::is_whitespace);
    let name = parts.next()?.trim().to_string();
    let value_part = parts.next()?.trim();
    let quote = value_part.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let value = value_part[1..].split(quote).next()?.to_string();
    Some((name, value))
}

fn parse_start_tag(
    body: &str,
    entities: &HashMap<String, String>,
) -> Result<(String, Vec<(String, String)>), XmlError> {
    let mut chars = body.char_indices().peekable();
    let name_start = 0;
    let mut name_end = body.len();
    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            name_end = i;
            break;
        }
        chars.next();
    }
    let name = body[name_start..name_end].to_string();
    if name.is_empty() {
        return Err(XmlError::Malformed("tag with empty name".to_string()));
    }

    let mut attrs = Vec::new();
    let rest = &body[name_end..];
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && (bytes[i] as char).is_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let attr_name_start = i;
        while i < bytes.len() && bytes[i] != b'=' && !(bytes[i] as char).is_whitespace() {
            i += 1;
        }
        let attr_name = rest[attr_name_start..i].to_string();
        if attr_name.is_empty() {
            return Err(XmlError::Malformed("attribute with empty name".to_string()));
        }
        while i < bytes.len() && (bytes[i] as char).is_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            return Err(XmlError::Malformed(format!("attribute `{attr_name}` missing `=`")));
        }
        i += 1;
        while i < bytes.len() && (bytes[i] as char).is_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || (bytes[i] != b'"' && bytes[i] != b'\'') {
            return Err(XmlError::Malformed(format!("attribute `{attr_name}` value not quoted")));
        }
        let quote = bytes[i];
        i += 1;
        let val_start = i;
        while i < bytes.len() && bytes[i] != quote {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(XmlError::Malformed(format!("attribute `{attr_name}` value unterminated")));
        }
        let raw_value = &rest[val_start..i];
        let value = entities::decode(raw_value, entities)?;
        attrs.push((attr_name, value));
        i += 1; // closing quote
    }

    Ok((name, attrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(tok: &mut RawTokenizer) -> Vec<RawEvent> {
        let mut out = Vec::new();
        loop {
            match tok.poll().unwrap() {
                Poll::Ready(RawEvent::Eof) => break,
                Poll::Ready(ev) => out.push(ev),
                Poll::Pending => break,
            }
        }
        out
    }

    #[test]
    fn parses_simple_element() {
        let mut tok = RawTokenizer::new(1 << 20);
        tok.feed(b"<Person id=\"7\"><name>Heinrich</name></Person>");
        tok.mark_closed();
        let events = drain(&mut tok);
        assert_eq!(
            events,
            vec![
                RawEvent::StartTag {
                    name: "Person".into(),
                    attrs: vec![("id".into(), "7".into())],
                    self_closing: false
                },
                RawEvent::StartTag { name: "name".into(), attrs: vec![], self_closing: false },
                RawEvent::Text("Heinrich".into()),
                RawEvent::EndTag { name: "name".into() },
                RawEvent::EndTag { name: "Person".into() },
            ]
        );
    }

    #[test]
    fn pending_until_enough_bytes_fed() {
        let mut tok = RawTokenizer::new(1 << 20);
        tok.feed(b"<Foo>bar");
        assert_eq!(tok.poll().unwrap(), Poll::Ready(RawEvent::StartTag {
            name: "Foo".into(),
            attrs: vec![],
            self_closing: false,
        }));
        // Text run not yet terminated by a tag: must not advance past it.
        assert_eq!(tok.poll().unwrap(), Poll::Pending);
        assert_eq!(tok.poll().unwrap(), Poll::Pending, "idempotent with no new bytes");
        tok.feed(b"</Foo>");
        assert_eq!(tok.poll().unwrap(), Poll::Ready(RawEvent::Text("bar".into())));
        assert_eq!(tok.poll().unwrap(), Poll::Ready(RawEvent::EndTag { name: "Foo".into() }));
    }

    #[test]
    fn self_closing_tag_needs_no_end_tag() {
        let mut tok = RawTokenizer::new(1 << 20);
        tok.feed(b"<Empty/>");
        tok.mark_closed();
        assert_eq!(
            drain(&mut tok),
            vec![RawEvent::StartTag { name: "Empty".into(), attrs: vec![], self_closing: true }]
        );
    }

    #[test]
    fn skips_comments_pis_and_cdata() {
        let mut tok = RawTokenizer::new(1 << 20);
        tok.feed(b"<?xml version=\"1.0\"?><!-- hi --><a><![CDATA[<raw>&]]></a>");
        tok.mark_closed();
        assert_eq!(
            drain(&mut tok),
            vec![
                RawEvent::StartTag { name: "a".into(), attrs: vec![], self_closing: false },
                RawEvent::Text("<raw>&".into()),
                RawEvent::EndTag { name: "a".into() },
            ]
        );
    }

    #[test]
    fn decodes_entities_in_text_and_attrs() {
        let mut tok = RawTokenizer::new(1 << 20);
        tok.feed(b"<a href=\"x&amp;y\">p &lt; q</a>");
        tok.mark_closed();
        assert_eq!(
            drain(&mut tok),
            vec![
                RawEvent::StartTag {
                    name: "a".into(),
                    attrs: vec![("href".into(), "x&y".into())],
                    self_closing: false
                },
                RawEvent::Text("p < q".into()),
                RawEvent::EndTag { name: "a".into() },
            ]
        );
    }

    #[test]
    fn doctype_internal_entity_is_usable() {
        let mut tok = RawTokenizer::new(1 << 20);
        tok.feed(b"<!DOCTYPE doc [ <!ENTITY co \"Acme\"> ]><a>&co;</a>");
        tok.mark_closed();
        assert_eq!(
            drain(&mut tok),
            vec![
                RawEvent::StartTag { name: "a".into(), attrs: vec![], self_closing: false },
                RawEvent::Text("Acme".into()),
                RawEvent::EndTag { name: "a".into() },
            ]
        );
    }

    #[test]
    fn mismatched_end_tag_is_malformed() {
        let mut tok = RawTokenizer::new(1 << 20);
        tok.feed(b"<a><b></a></b>");
        assert!(matches!(tok.poll().unwrap(), Poll::Ready(RawEvent::StartTag { .. })));
        assert!(matches!(tok.poll().unwrap(), Poll::Ready(RawEvent::StartTag { .. })));
        assert!(tok.poll().is_err());
    }

    #[test]
    fn oversized_pending_element_errors() {
        let mut tok = RawTokenizer::new(8);
        tok.feed(b"<a>123456789");
        assert!(matches!(tok.poll().unwrap(), Poll::Ready(RawEvent::StartTag { .. })));
        assert!(matches!(tok.poll(), Err(XmlError::ElementTooLarge { limit: 8 })));
    }

    #[test]
    fn closing_transport_mid_element_is_session_ended() {
        let mut tok = RawTokenizer::new(1 << 20);
        tok.feed(b"<a>partial");
        tok.mark_closed();
        assert!(matches!(tok.poll().unwrap(), Poll::Ready(RawEvent::StartTag { .. })));
        assert!(matches!(tok.poll(), Err(XmlError::SessionEnded)));
    }

    #[test]
    fn nested_source_emits_then_pops() {
        let mut tok = RawTokenizer::new(1 << 20);
        tok.feed(b"<Outer>");
        assert!(matches!(tok.poll().unwrap(), Poll::Ready(RawEvent::StartTag { .. })));
        tok.push_source(b"<Inner>v</Inner>".to_vec());
        assert_eq!(
            tok.poll().unwrap(),
            Poll::Ready(RawEvent::StartTag { name: "Inner".into(), attrs: vec![], self_closing: false })
        );
        assert_eq!(tok.poll().unwrap(), Poll::Ready(RawEvent::Text("v".into())));
        assert_eq!(tok.poll().unwrap(), Poll::Ready(RawEvent::EndTag { name: "Inner".into() }));
        assert_eq!(tok.poll().unwrap(), Poll::Ready(RawEvent::SourcePopped));
        assert!(tok.in_nested_source() == false);
        tok.feed(b"</Outer>");
        assert_eq!(tok.poll().unwrap(), Poll::Ready(RawEvent::EndTag { name: "Outer".into() }));
    }
}
