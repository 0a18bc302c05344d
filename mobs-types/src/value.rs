//! [`Value`] and [`Record`] — the intermediate, type-erased form a concrete
//! [`crate::traverse::Traverse`] record converts to/from. Both the compact
//! text format (§6.2) and `mobs-mrpc`'s `XmlOut` visitor (§4.6) walk a
//! `Record` rather than the concrete struct directly.

use crate::descriptor::FieldDescriptor;

/// A leaf or container value. Nested records keep their own type name so a
/// generic writer (XML or text) can tag the element without the static type.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Object(Record),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Record> {
        match self {
            Value::Object(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// A reflective record: a registered type name plus its members in
/// descriptor order (§3.3 "an ordered list of children").
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub type_name: String,
    pub fields: Vec<(FieldDescriptor, Value)>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), fields: Vec::new() }
    }

    pub fn push(&mut self, desc: FieldDescriptor, value: Value) -> &mut Self {
        self.fields.push((desc, value));
        self
    }

    /// Look up a member by its declared (not alt) name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(d, _)| d.name == name).map(|(_, v)| v)
    }

    pub fn get_required(&self, name: &str) -> Result<&Value, crate::error::Error> {
        match self.get(name) {
            Some(v) if !v.is_null() => Ok(v),
            _ => Err(crate::error::Error::MissingField { field: name.to_string() }),
        }
    }
}
