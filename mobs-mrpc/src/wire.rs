//! `XmlOut`/`XmlIn` (§4.6): walks a [`Record`] into [`XmlWriter`] calls, and
//! the mirror-image reconstruction from a stream of [`XmlEvent`]s.
//!
//! The reader half takes its events from a `next` closure rather than an
//! owned [`mobs_xml::XmlReader`] directly, so [`crate::engine`] can supply
//! one that pumps the transport whenever the reader needs more bytes — the
//! non-blocking contract lives at that layer, not here.
//!
//! Known simplification (see `DESIGN.md`): nested-record fields and
//! array-of-nested fields are not supported by this generic reader/writer;
//! none of the built-in handshake messages use them, and application
//! payloads that need them can implement `Traverse` by hand around a nested
//! `write_record`/`read_record` call.

use std::io::Write;

use mobs_types::{FieldDescriptor, FieldKind, Record, Value};
use mobs_xml::{XmlEvent, XmlWriter};

use crate::error::EngineError;

/// Write `record` as a single top-level element, honoring §4.6's null rules:
/// a null scalar or nested object becomes an empty element; a null vector is
/// omitted outright.
pub fn write_record<W: Write>(writer: &mut XmlWriter<W>, record: &Record) -> Result<(), mobs_xml::XmlError> {
    writer.write_tag_begin(&record.type_name)?;
    for (desc, value) in &record.fields {
        if desc.as_attribute {
            write_attribute(writer, desc, value)?;
        }
    }
    for (desc, value) in &record.fields {
        if !desc.as_attribute {
            write_element(writer, desc, value)?;
        }
    }
    writer.write_tag_end(&record.type_name)
}

fn write_attribute<W: Write>(
    writer: &mut XmlWriter<W>,
    desc: &FieldDescriptor,
    value: &Value,
) -> Result<(), mobs_xml::XmlError> {
    if value.is_null() {
        return Ok(());
    }
    let FieldKind::Scalar(hint) = desc.kind else {
        return Err(mobs_xml::XmlError::BadState(format!("`{}` is not a scalar, cannot be an attribute", desc.name)));
    };
    let text = mobs_types::scalar::to_str(value, hint, mobs_types::TextMode::Extended, desc.name)
        .map_err(|e| mobs_xml::XmlError::BadState(e.to_string()))?;
    writer.write_attribute(desc.wire_name(), &text)
}

fn write_element<W: Write>(
    writer: &mut XmlWriter<W>,
    desc: &FieldDescriptor,
    value: &Value,
) -> Result<(), mobs_xml::XmlError> {
    match (&desc.kind, value) {
        (FieldKind::Array(_), Value::Null) => Ok(()),
        (_, Value::Null) => {
            writer.write_tag_begin(desc.wire_name())?;
            writer.write_tag_end(desc.wire_name())
        }
        (FieldKind::Scalar(hint), _) => {
            let text = mobs_types::scalar::to_str(value, *hint, mobs_types::TextMode::Extended, desc.name)
                .map_err(|e| mobs_xml::XmlError::BadState(e.to_string()))?;
            writer.write_tag_begin(desc.wire_name())?;
            writer.write_value(&text)?;
            writer.write_tag_end(desc.wire_name())
        }
        (FieldKind::Array(item_kind), Value::Array(items)) => {
            let FieldKind::Scalar(hint) = **item_kind else {
                return Err(mobs_xml::XmlError::BadState("array-of-nested fields are not supported".to_string()));
            };
            for item in items {
                let text = mobs_types::scalar::to_str(item, hint, mobs_types::TextMode::Extended, desc.name)
                    .map_err(|e| mobs_xml::XmlError::BadState(e.to_string()))?;
                writer.write_tag_begin(desc.wire_name())?;
                writer.write_value(&text)?;
                writer.write_tag_end(desc.wire_name())?;
            }
            Ok(())
        }
        (FieldKind::Nested, _) => Err(mobs_xml::XmlError::BadState("nested record fields are not supported".to_string())),
        _ => Err(mobs_xml::XmlError::BadState(format!("`{}` value does not match its field kind", desc.name))),
    }
}

/// Read one top-level element into a [`Record`], pulling events from `next`
/// until the element's matching end tag. `next` should feed the transport
/// and retry when the underlying reader reports it needs more bytes — see
/// `crate::engine::MrpcEc::next_event`.
pub fn read_record(
    mut next: impl FnMut() -> Result<XmlEvent, EngineError>,
    descriptor: &'static [FieldDescriptor],
) -> Result<Record, EngineError> {
    let (type_name, attrs, self_closing) = expect_start(&mut next)?;
    read_body(&mut next, type_name, attrs, self_closing, descriptor)
}

/// Like [`read_record`], but the caller has already peeked the top-level
/// start tag to route it to one of several possible message types (used
/// where more than one message type is legal next, e.g. a handshake step
/// that must also recognize `MrpcSessionReturnError`). `routes` pairs each
/// accepted type name with its descriptor table.
pub fn read_dispatch(
    mut next: impl FnMut() -> Result<XmlEvent, EngineError>,
    routes: &[(&'static str, &'static [FieldDescriptor])],
) -> Result<Record, EngineError> {
    let (type_name, attrs, self_closing) = expect_start(&mut next)?;
    let descriptor = routes
        .iter()
        .find(|(name, _)| *name == type_name)
        .map(|(_, d)| *d)
        .ok_or_else(|| EngineError::Protocol(format!("unexpected message type `{type_name}`")))?;
    read_body(&mut next, type_name, attrs, self_closing, descriptor)
}

fn read_body(
    next: &mut impl FnMut() -> Result<XmlEvent, EngineError>,
    type_name: String,
    attrs: Vec<(String, String)>,
    self_closing: bool,
    descriptor: &'static [FieldDescriptor],
) -> Result<Record, EngineError> {
    let mut slots: Vec<Option<Value>> = vec![None; descriptor.len()];

    for (key, val) in &attrs {
        if let Some((idx, desc)) = descriptor.iter().enumerate().find(|(_, d)| d.as_attribute && d.wire_name() == key)
        {
            let FieldKind::Scalar(hint) = desc.kind else {
                return Err(EngineError::Protocol(format!("attribute `{key}` is not a scalar field")));
            };
            slots[idx] = Some(mobs_types::scalar::from_str(val, hint, desc.name)?);
        }
    }

    if !self_closing {
        read_children(next, &type_name, descriptor, &mut slots)?;
    }

    let mut rec = Record::new(type_name);
    for (desc, slot) in descriptor.iter().zip(slots) {
        rec.push(*desc, slot.unwrap_or(Value::Null));
    }
    Ok(rec)
}

fn read_children(
    next: &mut impl FnMut() -> Result<XmlEvent, EngineError>,
    type_name: &str,
    descriptor: &'static [FieldDescriptor],
    slots: &mut [Option<Value>],
) -> Result<(), EngineError> {
    loop {
        match next()? {
            XmlEvent::EndTag { name } if name == type_name => return Ok(()),
            XmlEvent::StartTag { name, self_closing: child_closing, .. } => {
                let (idx, desc) = descriptor
                    .iter()
                    .enumerate()
                    .find(|(_, d)| !d.as_attribute && d.wire_name() == name)
                    .ok_or_else(|| EngineError::Protocol(format!("unexpected element `{name}`")))?;
                let text = if child_closing { String::new() } else { read_text_until_end(next, &name)? };
                assign_child(desc, &text, child_closing, &mut slots[idx])?;
            }
            XmlEvent::Text(t) => {
                if !t.trim().is_empty() {
                    return Err(EngineError::Protocol(format!("unexpected text `{t}` in `{type_name}`")));
                }
            }
            XmlEvent::EncryptionFinished => {}
            other => return Err(EngineError::Protocol(format!("unexpected event {other:?} in `{type_name}`"))),
        }
    }
}

fn assign_child(
    desc: &FieldDescriptor,
    text: &str,
    self_closing: bool,
    slot: &mut Option<Value>,
) -> Result<(), EngineError> {
    match desc.kind {
        FieldKind::Scalar(hint) => {
            let value = if self_closing && desc.nullable {
                Value::Null
            } else {
                mobs_types::scalar::from_str(text, hint, desc.name)?
            };
            *slot = Some(value);
            Ok(())
        }
        FieldKind::Array(item_kind) => {
            let FieldKind::Scalar(hint) = *item_kind else {
                return Err(EngineError::Protocol("nested array items are not supported".to_string()));
            };
            let item = mobs_types::scalar::from_str(text, hint, desc.name)?;
            match slot.get_or_insert_with(|| Value::Array(Vec::new())) {
                Value::Array(items) => items.push(item),
                _ => unreachable!("array slot always initialized as Value::Array"),
            }
            Ok(())
        }
        FieldKind::Nested => {
            Err(EngineError::Protocol("nested record fields are not supported by the generic XML reader".to_string()))
        }
    }
}

fn read_text_until_end(next: &mut impl FnMut() -> Result<XmlEvent, EngineError>, name: &str) -> Result<String, EngineError> {
    let mut text = String::new();
    loop {
        match next()? {
            XmlEvent::Text(t) => text.push_str(&t),
            XmlEvent::EndTag { name: end_name } if end_name == name => return Ok(text),
            XmlEvent::EncryptionFinished => {}
            other => return Err(EngineError::Protocol(format!("unexpected event {other:?} while reading `{name}`"))),
        }
    }
}

fn expect_start(
    next: &mut impl FnMut() -> Result<XmlEvent, EngineError>,
) -> Result<(String, Vec<(String, String)>, bool), EngineError> {
    match next()? {
        XmlEvent::StartTag { name, attrs, self_closing } => Ok((name, attrs, self_closing)),
        other => Err(EngineError::Protocol(format!("expected a start tag, got {other:?}"))),
    }
}
