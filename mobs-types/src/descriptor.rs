//! Per-type static descriptor tables (§3.3, §9 "derive-like facility").
//!
//! A hand-written `impl Traverse` plays the role the original's reflective
//! field macros played: the descriptor table is the metadata a macro would
//! have generated, kept here as plain `const` data instead.

/// How a scalar's `Value` maps to/from its text representation (§6.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarHint {
    PlainString,
    Integer,
    Float,
    Boolean,
    /// Base64 in both text modes.
    Bytes,
    /// ISO-8601 in extended mode, epoch seconds in compact mode.
    Timestamp,
    /// Variant name, in both modes (see `DESIGN.md` for why ordinal-mode
    /// enum rendering was not carried over).
    Enum,
}

/// Whether a member is a leaf scalar, a nested record, or a vector. A
/// vector's element kind is itself a `FieldKind`, so `Array` carries a
/// `'static` reference to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarHint),
    Nested,
    Array(&'static FieldKind),
}

/// One member's reflective metadata (§3.3).
#[derive(Clone, Copy, Debug)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub alt_name: Option<&'static str>,
    /// 1..N database-style primary-key position, if this field takes part
    /// in one.
    pub key_ordinal: Option<u32>,
    pub as_attribute: bool,
    pub nullable: bool,
    /// Marks the value for transparent encryption (§3.3) — carried as
    /// metadata; `mobs-mrpc`'s `XmlOut` visitor decides what to do with it.
    pub encrypted: bool,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// The name used on the wire: `alt_name` if set, else `name`.
    pub fn wire_name(&self) -> &'static str {
        self.alt_name.unwrap_or(self.name)
    }
}
