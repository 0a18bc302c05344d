//! Shared fixtures for the scenario tests in this directory (§8): a pair of
//! application message types the prose scenarios name directly
//! (`MrpcPerson`, `BigDat`), plus a minimal [`ServerAuthority`] backed by a
//! single recognized client key.

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mobs_crypto::ecdh::StaticKeyPair;
use mobs_mrpc::cache::SessionCache;
use mobs_mrpc::engine::ServerAuthority;
use mobs_types::{FieldDescriptor, FieldKind, Record, ScalarHint, Traverse, Value};
use p256::PublicKey;

const NAME: FieldDescriptor = FieldDescriptor {
    name: "name",
    alt_name: None,
    key_ordinal: None,
    as_attribute: false,
    nullable: false,
    encrypted: false,
    kind: FieldKind::Scalar(ScalarHint::PlainString),
};

/// The scenario's "say hello" application message (§8, S1/S4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MrpcPerson {
    pub name: String,
}

impl Traverse for MrpcPerson {
    const TYPE_NAME: &'static str = "MrpcPerson";

    fn descriptor() -> &'static [FieldDescriptor] {
        &[NAME]
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new(Self::TYPE_NAME);
        r.push(NAME, Value::Str(self.name.clone()));
        r
    }

    fn from_record(record: &Record) -> Result<Self, mobs_types::Error> {
        Ok(Self {
            name: record
                .get_required("name")?
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| mobs_types::Error::TypeMismatch { field: "name".to_string(), expected: "string" })?,
        })
    }
}

const LENGTH: FieldDescriptor = FieldDescriptor {
    name: "length",
    alt_name: None,
    key_ordinal: None,
    as_attribute: false,
    nullable: false,
    encrypted: false,
    kind: FieldKind::Scalar(ScalarHint::Integer),
};
const DAT_NAME: FieldDescriptor = FieldDescriptor { name: "name", ..LENGTH };

/// The attachment-header application message (§8, S6): announces the byte
/// count and a label before the sender follows up with `out_byte_stream`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BigDat {
    pub length: u64,
    pub name: String,
}

impl Traverse for BigDat {
    const TYPE_NAME: &'static str = "BigDat";

    fn descriptor() -> &'static [FieldDescriptor] {
        &[LENGTH, DAT_NAME]
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new(Self::TYPE_NAME);
        r.push(LENGTH, Value::Int(self.length as i64));
        r.push(DAT_NAME, Value::Str(self.name.clone()));
        r
    }

    fn from_record(record: &Record) -> Result<Self, mobs_types::Error> {
        Ok(Self {
            length: record
                .get_required("length")?
                .as_int()
                .ok_or_else(|| mobs_types::Error::TypeMismatch { field: "length".to_string(), expected: "integer" })?
                as u64,
            name: record
                .get_required("name")?
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| mobs_types::Error::TypeMismatch { field: "name".to_string(), expected: "string" })?,
        })
    }
}

/// A server authority recognizing exactly one client `keyId`, and counting
/// how many times a key refresh lands (S4 asserts this fires exactly once).
pub struct TestAuthority {
    pub keys: StaticKeyPair,
    pub client_key_id: &'static str,
    pub client_pub: PublicKey,
    key_changed: AtomicUsize,
}

impl TestAuthority {
    pub fn new(keys: StaticKeyPair, client_key_id: &'static str, client_pub: PublicKey) -> Arc<Self> {
        Arc::new(Self { keys, client_key_id, client_pub, key_changed: AtomicUsize::new(0) })
    }

    pub fn key_changed_count(&self) -> usize {
        self.key_changed.load(Ordering::SeqCst)
    }
}

impl ServerAuthority for TestAuthority {
    fn static_keys(&self) -> &StaticKeyPair {
        &self.keys
    }

    fn sender_public_key(&self, key_id: &str) -> Option<PublicKey> {
        (key_id == self.client_key_id).then(|| self.client_pub.clone())
    }

    fn key_changed(&self, _cipher: &str, _key_name: &str) {
        self.key_changed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A fresh process-wide-shaped cache, leaked for the `'static` lifetime
/// [`mobs_mrpc::engine::MrpcEc::new_server`] requires — mirrors the existing
/// engine unit tests' own fixture.
pub fn leaked_cache() -> &'static SessionCache {
    Box::leak(Box::new(SessionCache::new()))
}

pub fn duplex_pair() -> (UnixStream, UnixStream) {
    UnixStream::pair().expect("unix socket pair")
}
