use std::fmt;

/// Errors from scalar conversion, record traversal, and the type registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// `from_str`/`from_record` found a value that doesn't match its
    /// declared [`crate::descriptor::ScalarHint`].
    TypeMismatch { field: String, expected: &'static str },
    /// A required (non-nullable) field was missing from a `Record`.
    MissingField { field: String },
    /// The compact text format failed to parse (bad token, unterminated
    /// string, unexpected character).
    Syntax(String),
    /// [`crate::registry`] has no constructor registered for this type name.
    UnknownType(String),
    /// [`crate::registry::TypeRegistry::register`] called twice for the
    /// same name.
    DuplicateType(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { field, expected } => {
                write!(f, "field `{field}`: expected {expected}")
            }
            Self::MissingField { field } => write!(f, "missing required field `{field}`"),
            Self::Syntax(msg) => write!(f, "text format syntax error: {msg}"),
            Self::UnknownType(name) => write!(f, "no type registered as `{name}`"),
            Self::DuplicateType(name) => write!(f, "type `{name}` already registered"),
        }
    }
}

impl std::error::Error for Error {}
