//! # mobs — MRPC-EC in one import
//!
//! `mobs` re-exports the session engine, protocol messages, and object model
//! split across the `mobs-*` sub-crates so a consumer only needs one
//! dependency line.
//!
//! | Sub-crate     | Role                                                |
//! |---------------|------------------------------------------------------|
//! | `mobs-types`  | Reflective object model: `Record`, `Value`, `Traverse` |
//! | `mobs-codec`  | Base64, AES-256-CBC buffers, one-shot frame helpers   |
//! | `mobs-xml`    | Streaming XML reader/writer with transparent encryption |
//! | `mobs-crypto` | ECDH key agreement, ECDSA sign/verify, PEM key I/O    |
//! | `mobs-mrpc`   | Session engine, handshake state machine, attachments  |
//!
//! ## Quick start
//!
//! ```no_run
//! use mobs::{MrpcEc, Session};
//! use std::net::TcpStream;
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("localhost:4433")?;
//! let mut client = MrpcEc::new_client(stream, Session::new("localhost:4433"));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

/// Re-export of [`mobs_types`] — the reflective object model.
pub use mobs_types as types;

/// Re-export of [`mobs_crypto`] — ECDH, ECDSA, PEM key I/O.
pub use mobs_crypto as crypto;

pub use mobs_mrpc::{
    engine, register_builtin_types, EngineError, EngineState, MrpcEc, MrpcGetPublickey, MrpcNewEphemeralKey,
    MrpcSessionAuth, MrpcSessionLoginResult, MrpcSessionReturnError, Session, SessionCache, Transport,
};
pub use mobs_mrpc::engine::{Role, ServerAuthority};
pub use mobs_types::{FieldDescriptor, Record, Traverse, Value};
