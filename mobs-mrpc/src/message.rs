//! Protocol message types (§6.1 table). Each is a concrete struct with a
//! hand-written [`Traverse`] impl — the "derive-like facility" `mobs-types`
//! calls for, applied to the handful of record shapes the handshake itself
//! needs. Application payloads (e.g. an `MrpcPerson` exchanged once a
//! session is `Connected`) are ordinary `Traverse` types defined by the
//! application and are never named here.

use mobs_types::{FieldDescriptor, FieldKind, Record, ScalarHint, Traverse, Value};

const KEY_ID: FieldDescriptor = FieldDescriptor {
    name: "keyId",
    alt_name: None,
    key_ordinal: None,
    as_attribute: false,
    nullable: false,
    encrypted: false,
    kind: FieldKind::Scalar(ScalarHint::PlainString),
};
const LOGIN: FieldDescriptor = FieldDescriptor { name: "login", ..KEY_ID };
const SOFTWARE: FieldDescriptor = FieldDescriptor { name: "software", ..KEY_ID };
const HOSTNAME: FieldDescriptor = FieldDescriptor { name: "hostname", ..KEY_ID };
const AUTH: FieldDescriptor =
    FieldDescriptor { name: "auth", kind: FieldKind::Scalar(ScalarHint::Bytes), ..KEY_ID };

/// `MrpcSessionAuth` (C→S, encrypted under the ephemeral key) — §4.5.1 step 5.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MrpcSessionAuth {
    pub key_id: String,
    pub login: String,
    pub software: String,
    pub hostname: String,
    /// `Sign(priv_key, session_key)`.
    pub auth: Vec<u8>,
}

impl Traverse for MrpcSessionAuth {
    const TYPE_NAME: &'static str = "MrpcSessionAuth";

    fn descriptor() -> &'static [FieldDescriptor] {
        &[KEY_ID, LOGIN, SOFTWARE, HOSTNAME, AUTH]
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new(Self::TYPE_NAME);
        r.push(KEY_ID, Value::Str(self.key_id.clone()));
        r.push(LOGIN, Value::Str(self.login.clone()));
        r.push(SOFTWARE, Value::Str(self.software.clone()));
        r.push(HOSTNAME, Value::Str(self.hostname.clone()));
        r.push(AUTH, Value::Bytes(self.auth.clone()));
        r
    }

    fn from_record(record: &Record) -> Result<Self, mobs_types::Error> {
        Ok(Self {
            key_id: str_field(record, "keyId")?,
            login: str_field(record, "login")?,
            software: str_field(record, "software")?,
            hostname: str_field(record, "hostname")?,
            auth: bytes_field(record, "auth")?,
        })
    }
}

const SESS_ID: FieldDescriptor = FieldDescriptor {
    name: "sessId",
    alt_name: None,
    key_ordinal: None,
    as_attribute: false,
    nullable: false,
    encrypted: false,
    kind: FieldKind::Scalar(ScalarHint::Integer),
};
const SESSION_REUSE_TIME: FieldDescriptor = FieldDescriptor { name: "sessionReuseTime", ..SESS_ID };
const SESSION_KEY_VALID_TIME: FieldDescriptor = FieldDescriptor { name: "sessionKeyValidTime", ..SESS_ID };

/// `MrpcSessionLoginResult` (S→C, encrypted) — §4.5.2.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MrpcSessionLoginResult {
    pub sess_id: u32,
    pub session_reuse_time: u64,
    pub session_key_valid_time: u64,
}

impl Traverse for MrpcSessionLoginResult {
    const TYPE_NAME: &'static str = "MrpcSessionLoginResult";

    fn descriptor() -> &'static [FieldDescriptor] {
        &[SESS_ID, SESSION_REUSE_TIME, SESSION_KEY_VALID_TIME]
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new(Self::TYPE_NAME);
        r.push(SESS_ID, Value::Int(self.sess_id as i64));
        r.push(SESSION_REUSE_TIME, Value::Int(self.session_reuse_time as i64));
        r.push(SESSION_KEY_VALID_TIME, Value::Int(self.session_key_valid_time as i64));
        r
    }

    fn from_record(record: &Record) -> Result<Self, mobs_types::Error> {
        Ok(Self {
            sess_id: int_field(record, "sessId")? as u32,
            session_reuse_time: int_field(record, "sessionReuseTime")? as u64,
            session_key_valid_time: int_field(record, "sessionKeyValidTime")? as u64,
        })
    }
}

const PUBKEY: FieldDescriptor = FieldDescriptor {
    name: "pubkey",
    alt_name: None,
    key_ordinal: None,
    as_attribute: false,
    nullable: true,
    encrypted: false,
    kind: FieldKind::Scalar(ScalarHint::PlainString),
};

/// `MrpcGetPublickey` (§6.1): the request carries no fields, the response
/// carries `pubkey`. One type serves both directions, `pubkey` empty on the
/// request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MrpcGetPublickey {
    /// `None` for the request; `Some(PEM)` for the response.
    pub pubkey: Option<String>,
}

impl Traverse for MrpcGetPublickey {
    const TYPE_NAME: &'static str = "MrpcGetPublickey";

    fn descriptor() -> &'static [FieldDescriptor] {
        &[PUBKEY]
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new(Self::TYPE_NAME);
        match &self.pubkey {
            Some(pem) => r.push(PUBKEY, Value::Str(pem.clone())),
            None => r.push(PUBKEY, Value::Null),
        };
        r
    }

    fn from_record(record: &Record) -> Result<Self, mobs_types::Error> {
        Ok(Self { pubkey: record.get("pubkey").and_then(Value::as_str).map(str::to_string) })
    }
}

const EPHEMERAL_KEY: FieldDescriptor = FieldDescriptor {
    name: "key",
    alt_name: None,
    key_ordinal: None,
    as_attribute: false,
    nullable: false,
    encrypted: false,
    kind: FieldKind::Scalar(ScalarHint::Bytes),
};

/// `MrpcNewEphemeralKey` (C→S, encrypted under the *current* session key) —
/// §4.5.4 step 3.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MrpcNewEphemeralKey {
    /// New ephemeral public component, SEC1/DER-encoded.
    pub key: Vec<u8>,
}

impl Traverse for MrpcNewEphemeralKey {
    const TYPE_NAME: &'static str = "MrpcNewEphemeralKey";

    fn descriptor() -> &'static [FieldDescriptor] {
        &[EPHEMERAL_KEY]
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new(Self::TYPE_NAME);
        r.push(EPHEMERAL_KEY, Value::Bytes(self.key.clone()));
        r
    }

    fn from_record(record: &Record) -> Result<Self, mobs_types::Error> {
        Ok(Self { key: bytes_field(record, "key")? })
    }
}

const ERROR: FieldDescriptor = FieldDescriptor {
    name: "error",
    alt_name: None,
    key_ordinal: None,
    as_attribute: false,
    nullable: false,
    encrypted: false,
    kind: FieldKind::Scalar(ScalarHint::PlainString),
};

/// `MrpcSessionReturnError` (either direction, always unencrypted) — §4.5.6.
/// The only message type permitted on the wire after a handshake failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MrpcSessionReturnError {
    pub error: String,
}

impl MrpcSessionReturnError {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }

    /// Reserved leading token, if any (`PLS_RELOG`, `KEY_EXPIRED`).
    pub fn reserved_token(&self) -> Option<&'static str> {
        if self.error.starts_with(crate::error::KEY_EXPIRED) {
            Some(crate::error::KEY_EXPIRED)
        } else if self.error.starts_with(crate::error::PLS_RELOG) {
            Some(crate::error::PLS_RELOG)
        } else {
            None
        }
    }
}

impl Traverse for MrpcSessionReturnError {
    const TYPE_NAME: &'static str = "MrpcSessionReturnError";

    fn descriptor() -> &'static [FieldDescriptor] {
        &[ERROR]
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new(Self::TYPE_NAME);
        r.push(ERROR, Value::Str(self.error.clone()));
        r
    }

    fn from_record(record: &Record) -> Result<Self, mobs_types::Error> {
        Ok(Self { error: str_field(record, "error")? })
    }
}

fn str_field(record: &Record, name: &str) -> Result<String, mobs_types::Error> {
    record
        .get_required(name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| mobs_types::Error::TypeMismatch { field: name.to_string(), expected: "string" })
}

fn int_field(record: &Record, name: &str) -> Result<i64, mobs_types::Error> {
    record
        .get_required(name)?
        .as_int()
        .ok_or_else(|| mobs_types::Error::TypeMismatch { field: name.to_string(), expected: "integer" })
}

fn bytes_field(record: &Record, name: &str) -> Result<Vec<u8>, mobs_types::Error> {
    record
        .get_required(name)?
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| mobs_types::Error::TypeMismatch { field: name.to_string(), expected: "bytes" })
}

/// Register the handshake message set with the process-global type registry
/// (§9: "registration happens at module init"). Idempotent: a second call
/// after the first succeeded is a no-op rather than a [`mobs_types::Error::DuplicateType`].
pub fn register_builtin_types() {
    for register in [
        register_one::<MrpcSessionAuth> as fn(),
        register_one::<MrpcSessionLoginResult>,
        register_one::<MrpcGetPublickey>,
        register_one::<MrpcNewEphemeralKey>,
        register_one::<MrpcSessionReturnError>,
    ] {
        register();
    }
}

fn register_one<T: Traverse + std::any::Any + Send + 'static>() {
    let reg = mobs_types::type_registry();
    if !reg.is_registered(T::TYPE_NAME) {
        reg.register::<T>().expect("type name just checked absent");
    }
}
