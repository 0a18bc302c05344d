//! Reflective, serializable object model (§3.3, §4.6, §6.2, §9).
//!
//! - [`descriptor`] — per-field metadata: `FieldDescriptor`/`ScalarHint`.
//! - [`value`] — the type-erased `Value`/`Record` intermediate form.
//! - [`scalar`] — `to_str`/`from_str` scalar leaf conversion.
//! - [`traverse`] — the `Traverse` trait concrete record types implement.
//! - [`registry`] — the process-global type-name → constructor registry.
//! - [`text`] — the compact JSON-like object text format (§6.2).

#![deny(unsafe_code)]

pub mod descriptor;
pub mod error;
pub mod registry;
pub mod scalar;
pub mod text;
pub mod traverse;
pub mod value;

pub use descriptor::{FieldDescriptor, FieldKind, ScalarHint};
pub use error::Error;
pub use registry::{registry as type_registry, TypeRegistry};
pub use scalar::TextMode;
pub use traverse::Traverse;
pub use value::{Record, Value};
