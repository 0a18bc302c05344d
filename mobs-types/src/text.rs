//! Compact JSON-like object text format (§6.2). Used for tests and logging,
//! never the RPC wire format (that's XML, via `mobs-mrpc`'s `XmlOut`).
//!
//! Grammar (informal):
//! ```text
//! record  := ident '{' (member (',' member)*)? '}'
//! member  := key ':' value
//! key     := ident | string
//! value   := string | bare-token | 'null' | record | array
//! array   := '[' (value (',' value)*)? ']'
//! ```
//! Quoted keys/strings follow JSON escaping for `\"` `\\` `\n` `\t` `\r`.

pub use crate::scalar::TextMode;

use crate::descriptor::{FieldDescriptor, FieldKind};
use crate::error::Error;
use crate::registry::registry;
use crate::scalar;
use crate::value::{Record, Value};

/// Render `record` in the compact text format.
pub fn to_text(record: &Record, mode: TextMode) -> Result<String, Error> {
    let mut out = String::new();
    write_record(record, mode, &mut out)?;
    Ok(out)
}

fn write_record(record: &Record, mode: TextMode, out: &mut String) -> Result<(), Error> {
    out.push_str(&record.type_name);
    out.push('{');
    let mut first = true;
    for (desc, value) in &record.fields {
        if value.is_null() && desc.nullable {
            continue;
        }
        if !first {
            out.push(',');
        }
        first = false;
        write_key(desc.wire_name(), out);
        out.push(':');
        write_value(value, desc, mode, out)?;
    }
    out.push('}');
    Ok(())
}

fn write_key(key: &str, out: &mut String) {
    if is_bare_ident(key) {
        out.push_str(key);
    } else {
        write_quoted(key, out);
    }
}

fn write_value(value: &Value, desc: &FieldDescriptor, mode: TextMode, out: &mut String) -> Result<(), Error> {
    write_kind_value(value, &desc.kind, desc.name, mode, out)
}

fn write_kind_value(
    value: &Value,
    kind: &FieldKind,
    field_name: &str,
    mode: TextMode,
    out: &mut String,
) -> Result<(), Error> {
    match (kind, value) {
        (_, Value::Null) => out.push_str("null"),
        (FieldKind::Scalar(hint), _) => {
            let text = scalar::to_str(value, *hint, mode, field_name)?;
            match hint {
                crate::descriptor::ScalarHint::Integer | crate::descriptor::ScalarHint::Float
                    if mode == TextMode::Compact =>
                {
                    out.push_str(&text);
                }
                crate::descriptor::ScalarHint::Boolean => out.push_str(&text),
                crate::descriptor::ScalarHint::Timestamp if mode == TextMode::Compact => out.push_str(&text),
                _ => write_quoted(&text, out),
            }
        }
        (FieldKind::Nested, Value::Object(rec)) => write_record(rec, mode, out)?,
        (FieldKind::Array(item_kind), Value::Array(items)) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_kind_value(item, item_kind, field_name, mode, out)?;
            }
            out.push(']');
        }
        _ => return Err(Error::TypeMismatch { field: field_name.to_string(), expected: "matching field kind" }),
    }
    Ok(())
}

fn write_quoted(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn is_bare_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Parse the compact text format back into a `Record`, using `descriptor`
/// to interpret each field's scalar hint. Nested-record fields look their
/// own descriptor up in the process-global [`crate::registry`] by the inline
/// type name the text carries.
pub fn parse_text(input: &str, descriptor: &'static [FieldDescriptor]) -> Result<Record, Error> {
    let mut p = Parser { bytes: input.as_bytes(), pos: 0 };
    let rec = p.parse_record(descriptor)?;
    p.skip_ws();
    if p.pos != p.bytes.len() {
        return Err(Error::Syntax("trailing data after record".to_string()));
    }
    Ok(rec)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && (self.bytes[self.pos] as char).is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), Error> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::Syntax(format!("expected `{}` at byte {}", c as char, self.pos)))
        }
    }

    fn parse_ident(&mut self) -> Result<String, Error> {
        self.skip_ws();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if (b as char).is_alphanumeric() || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(Error::Syntax(format!("expected identifier at byte {start}")));
        }
        Ok(std::str::from_utf8(&self.bytes[start..self.pos]).unwrap().to_string())
    }

    fn parse_quoted(&mut self) -> Result<String, Error> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(Error::Syntax("unterminated string".to_string())),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        Some(b'r') => out.push('\r'),
                        _ => return Err(Error::Syntax("bad escape sequence".to_string())),
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    let start = self.pos;
                    while !matches!(self.peek(), Some(b'"') | Some(b'\\') | None) {
                        self.pos += 1;
                    }
                    out.push_str(std::str::from_utf8(&self.bytes[start..self.pos]).unwrap());
                }
            }
        }
        Ok(out)
    }

    fn parse_key(&mut self) -> Result<String, Error> {
        self.skip_ws();
        if self.peek() == Some(b'"') {
            self.parse_quoted()
        } else {
            self.parse_ident()
        }
    }

    fn parse_bare_token(&mut self) -> Result<String, Error> {
        self.skip_ws();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b',' || b == b'}' || b == b']' || (b as char).is_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(Error::Syntax(format!("expected value at byte {start}")));
        }
        Ok(std::str::from_utf8(&self.bytes[start..self.pos]).unwrap().to_string())
    }

    fn parse_record(&mut self, descriptor: &'static [FieldDescriptor]) -> Result<Record, Error> {
        let type_name = self.parse_ident()?;
        self.expect(b'{')?;
        let mut rec = Record::new(type_name);
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(rec);
        }
        loop {
            let key = self.parse_key()?;
            self.expect(b':')?;
            let desc = *descriptor
                .iter()
                .find(|d| d.name == key || d.alt_name == Some(key.as_str()))
                .ok_or_else(|| Error::Syntax(format!("unknown field `{key}`")))?;
            let value = self.parse_value(&desc)?;
            rec.push(desc, value);
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(Error::Syntax(format!("expected `,` or `}}` at byte {}", self.pos))),
            }
        }
        Ok(rec)
    }

    fn parse_value(&mut self, desc: &FieldDescriptor) -> Result<Value, Error> {
        self.parse_kind_value(&desc.kind, desc.name)
    }

    fn parse_kind_value(&mut self, kind: &FieldKind, field_name: &str) -> Result<Value, Error> {
        self.skip_ws();
        match *kind {
            FieldKind::Array(item_kind) => {
                self.expect(b'[')?;
                let mut items = Vec::new();
                self.skip_ws();
                if self.peek() == Some(b']') {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                loop {
                    items.push(self.parse_kind_value(item_kind, field_name)?);
                    self.skip_ws();
                    match self.peek() {
                        Some(b',') => {
                            self.pos += 1;
                            continue;
                        }
                        Some(b']') => {
                            self.pos += 1;
                            break;
                        }
                        _ => return Err(Error::Syntax("expected `,` or `]` in array".to_string())),
                    }
                }
                Ok(Value::Array(items))
            }
            FieldKind::Nested => {
                if self.peek() == Some(b'n') {
                    self.parse_null_literal()?;
                    return Ok(Value::Null);
                }
                let save = self.pos;
                let type_name = self.parse_ident()?;
                self.pos = save;
                let nested_descriptor = registry()
                    .descriptor_for(&type_name)
                    .ok_or_else(|| Error::UnknownType(type_name.clone()))?;
                Ok(Value::Object(self.parse_record(nested_descriptor)?))
            }
            FieldKind::Scalar(hint) => {
                if self.peek() == Some(b'n') && self.bytes[self.pos..].starts_with(b"null") {
                    self.parse_null_literal()?;
                    return Ok(Value::Null);
                }
                let text = if self.peek() == Some(b'"') {
                    self.parse_quoted()?
                } else {
                    self.parse_bare_token()?
                };
                scalar::from_str(&text, hint, field_name)
            }
        }
    }

    fn parse_null_literal(&mut self) -> Result<(), Error> {
        if self.bytes[self.pos..].starts_with(b"null") {
            self.pos += 4;
            Ok(())
        } else {
            Err(Error::Syntax("expected `null`".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ScalarHint;
    use crate::traverse::Traverse;

    #[derive(Debug, PartialEq)]
    struct Person {
        name: String,
        age: i64,
    }

    const NAME: FieldDescriptor = FieldDescriptor {
        name: "name",
        alt_name: None,
        key_ordinal: Some(1),
        as_attribute: false,
        nullable: false,
        encrypted: false,
        kind: FieldKind::Scalar(ScalarHint::PlainString),
    };
    const AGE: FieldDescriptor = FieldDescriptor {
        name: "age",
        alt_name: None,
        key_ordinal: None,
        as_attribute: false,
        nullable: true,
        encrypted: false,
        kind: FieldKind::Scalar(ScalarHint::Integer),
    };

    impl Traverse for Person {
        const TYPE_NAME: &'static str = "Person";

        fn descriptor() -> &'static [FieldDescriptor] {
            &[NAME, AGE]
        }

        fn to_record(&self) -> Record {
            let mut r = Record::new(Self::TYPE_NAME);
            r.push(NAME, Value::Str(self.name.clone()));
            r.push(AGE, Value::Int(self.age));
            r
        }

        fn from_record(record: &Record) -> Result<Self, Error> {
            Ok(Person {
                name: record.get_required("name")?.as_str().unwrap().to_string(),
                age: record.get("age").and_then(Value::as_int).unwrap_or_default(),
            })
        }
    }

    #[test]
    fn roundtrip_flat_record_compact() {
        let p = Person { name: "Heinrich".to_string(), age: 7 };
        let text = to_text(&p.to_record(), TextMode::Compact).unwrap();
        assert_eq!(text, "Person{name:\"Heinrich\",age:7}");
        let rec = parse_text(&text, Person::descriptor()).unwrap();
        assert_eq!(Person::from_record(&rec).unwrap(), p);
    }

    #[test]
    fn null_nullable_field_is_omitted_on_write_and_absent_on_read() {
        let mut rec = Record::new("Person");
        rec.push(NAME, Value::Str("Goethe".to_string()));
        rec.push(AGE, Value::Null);
        let text = to_text(&rec, TextMode::Extended).unwrap();
        assert_eq!(text, "Person{name:\"Goethe\"}");
        let parsed = parse_text(&text, Person::descriptor()).unwrap();
        assert_eq!(Person::from_record(&parsed).unwrap(), Person { name: "Goethe".to_string(), age: 0 });
    }

    #[test]
    fn rejects_unknown_field() {
        assert!(parse_text("Person{bogus:1}", Person::descriptor()).is_err());
    }

    const TAGS: FieldDescriptor = FieldDescriptor {
        name: "tags",
        alt_name: None,
        key_ordinal: None,
        as_attribute: false,
        nullable: false,
        encrypted: false,
        kind: FieldKind::Array(&FieldKind::Scalar(ScalarHint::Integer)),
    };

    #[test]
    fn array_of_scalars_roundtrips() {
        let mut rec = Record::new("Tagged");
        rec.push(TAGS, Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        let text = to_text(&rec, TextMode::Compact).unwrap();
        assert_eq!(text, "Tagged{tags:[1,2,3]}");
        let parsed = parse_text(&text, &[TAGS]).unwrap();
        assert_eq!(parsed.get("tags").unwrap(), &Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }
}
