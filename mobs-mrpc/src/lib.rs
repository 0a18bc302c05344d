//! MRPC-EC session engine: ECDH handshake, state machine, wire messages,
//! session cache, and the generic XML (de)serialization visitor that ties
//! `mobs-types` records to `mobs-xml` events.

pub mod cache;
pub mod engine;
pub mod error;
pub mod message;
pub mod session;
pub mod wire;

pub use cache::SessionCache;
pub use engine::{EngineState, MrpcEc, Transport};
pub use error::EngineError;
pub use message::{
    register_builtin_types, MrpcGetPublickey, MrpcNewEphemeralKey, MrpcSessionAuth, MrpcSessionLoginResult,
    MrpcSessionReturnError,
};
pub use session::Session;
