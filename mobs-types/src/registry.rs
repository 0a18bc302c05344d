//! Process-global type registry keyed by string (§9 "dynamic creation by
//! type name"). Backs the `MrpcSession*` message set's tag-lookup-based
//! parsing in `mobs-mrpc`, and is available to application code that wants
//! to register its own record types for the same treatment.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::descriptor::FieldDescriptor;
use crate::error::Error;
use crate::traverse::Traverse;
use crate::value::Record;

type ErasedConstructor = fn(&Record) -> Result<Box<dyn Any + Send>, Error>;
type DescriptorFn = fn() -> &'static [FieldDescriptor];

#[derive(Clone, Copy)]
struct TypeEntry {
    construct: ErasedConstructor,
    descriptor: DescriptorFn,
}

pub struct TypeRegistry {
    entries: Mutex<HashMap<String, TypeEntry>>,
}

static REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();

/// The process-wide registry. Registration happens at module init (§9); in
/// Rust terms, the first call that needs a given type registered should call
/// [`TypeRegistry::register`] before any lookup of that type name.
pub fn registry() -> &'static TypeRegistry {
    REGISTRY.get_or_init(|| TypeRegistry { entries: Mutex::new(HashMap::new()) })
}

fn construct<T: Traverse + Any + Send + 'static>(record: &Record) -> Result<Box<dyn Any + Send>, Error> {
    let value = T::from_record(record)?;
    Ok(Box::new(value))
}

impl TypeRegistry {
    /// Register `T` under its `Traverse::TYPE_NAME`. Idempotent re-registration
    /// of the exact same type is an error per §9 ("registration happens at
    /// module init") — callers should guard with a `std::sync::Once` or
    /// check [`Self::is_registered`] first if registration may run twice.
    pub fn register<T: Traverse + Any + Send + 'static>(&self) -> Result<(), Error> {
        let mut map = self.entries.lock().expect("registry mutex poisoned");
        if map.contains_key(T::TYPE_NAME) {
            return Err(Error::DuplicateType(T::TYPE_NAME.to_string()));
        }
        map.insert(T::TYPE_NAME.to_string(), TypeEntry { construct: construct::<T>, descriptor: T::descriptor });
        log::debug!("[types] registered {}", T::TYPE_NAME);
        Ok(())
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.entries.lock().expect("registry mutex poisoned").contains_key(type_name)
    }

    /// Construct the registered type named by `record.type_name`, returning
    /// it type-erased; the caller downcasts via [`Any::downcast`].
    pub fn construct(&self, record: &Record) -> Result<Box<dyn Any + Send>, Error> {
        let entry = {
            let map = self.entries.lock().expect("registry mutex poisoned");
            *map.get(record.type_name.as_str())
                .ok_or_else(|| Error::UnknownType(record.type_name.clone()))?
        };
        (entry.construct)(record)
    }

    /// The field descriptor table a registered type was recorded with — used
    /// by [`crate::text`] to interpret nested-record fields generically.
    pub fn descriptor_for(&self, type_name: &str) -> Option<&'static [FieldDescriptor]> {
        let map = self.entries.lock().expect("registry mutex poisoned");
        map.get(type_name).map(|e| (e.descriptor)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldDescriptor, FieldKind, ScalarHint};
    use crate::value::Value;

    #[derive(Debug, PartialEq)]
    struct Ping {
        seq: i64,
    }

    const SEQ: FieldDescriptor = FieldDescriptor {
        name: "seq",
        alt_name: None,
        key_ordinal: None,
        as_attribute: false,
        nullable: false,
        encrypted: false,
        kind: FieldKind::Scalar(ScalarHint::Integer),
    };

    impl Traverse for Ping {
        const TYPE_NAME: &'static str = "registry-test-Ping";

        fn descriptor() -> &'static [FieldDescriptor] {
            &[SEQ]
        }

        fn to_record(&self) -> Record {
            let mut r = Record::new(Self::TYPE_NAME);
            r.push(SEQ, Value::Int(self.seq));
            r
        }

        fn from_record(record: &Record) -> Result<Self, Error> {
            let seq = record.get_required("seq")?.as_int().ok_or(Error::TypeMismatch {
                field: "seq".to_string(),
                expected: "integer",
            })?;
            Ok(Ping { seq })
        }
    }

    #[test]
    fn register_then_construct_by_name() {
        let reg = TypeRegistry { entries: Mutex::new(HashMap::new()) };
        reg.register::<Ping>().unwrap();
        assert!(reg.is_registered("registry-test-Ping"));

        let rec = Ping { seq: 9 }.to_record();
        let boxed = reg.construct(&rec).unwrap();
        let ping = boxed.downcast::<Ping>().unwrap();
        assert_eq!(*ping, Ping { seq: 9 });
    }

    #[test]
    fn double_register_is_rejected() {
        let reg = TypeRegistry { entries: Mutex::new(HashMap::new()) };
        reg.register::<Ping>().unwrap();
        assert!(reg.register::<Ping>().is_err());
    }

    #[test]
    fn unknown_type_name_errors() {
        let reg = TypeRegistry { entries: Mutex::new(HashMap::new()) };
        let rec = Record::new("NoSuchType");
        assert!(matches!(reg.construct(&rec), Err(Error::UnknownType(_))));
    }
}
