//! The session engine: a long-lived struct owning one transport and one
//! [`Session`], driving the ECDH handshake, steady-state message exchange,
//! key refresh, and attachment substreams described by §3-§6.
//!
//! A single instance plays either [`Role::Client`] or [`Role::Server`]; both
//! share the same state machine and wire helpers, since the only asymmetry
//! is who initiates and who authenticates whom.

mod attachment;
mod state;
mod transport;

pub use attachment::{read_attachment, write_attachment};
pub use state::EngineState;
pub use transport::Transport;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use mobs_codec::{AesCryptBuf, CryptBufBase};
use mobs_crypto::ecdh::{Ephemeral, StaticKeyPair};
use mobs_crypto::sign;
use mobs_types::{FieldDescriptor, Record, Traverse};
use mobs_xml::{XmlEvent, XmlReader, XmlWriter};
use p256::{PublicKey, SecretKey};

use crate::cache::SessionCache;
use crate::error::EngineError;
use crate::message::{
    MrpcGetPublickey, MrpcNewEphemeralKey, MrpcSessionAuth, MrpcSessionLoginResult, MrpcSessionReturnError,
};
use crate::session::Session;
use crate::wire;

/// Mirrors `mobs_xml::reader`'s private default; restored once a server
/// handshake clears the tightened handshake-time cap.
const DEFAULT_MAX_ELEMENT_SIZE: usize = 256 * 1024 * 1024;

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

fn next_session_id() -> u32 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

fn state_name(state: EngineState) -> &'static str {
    match state {
        EngineState::Fresh => "Fresh",
        EngineState::GetPubKey => "GetPubKey",
        EngineState::ConnectingServer => "ConnectingServer",
        EngineState::ConnectingServerConfirmed => "ConnectingServerConfirmed",
        EngineState::ConnectingClient => "ConnectingClient",
        EngineState::Connected => "Connected",
        EngineState::ReadyRead => "ReadyRead",
        EngineState::Closing => "Closing",
    }
}

/// Which side of the conversation an engine instance plays (§3.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Server-side hooks: principal lookup and session-lifetime policy
/// (§4.5.2, §4.5.4, §4.5.5). The reference `mobs-srv` binary backs this with
/// a static key table; a real deployment would consult a directory service.
pub trait ServerAuthority: Send + Sync {
    /// The server's long-term static key pair, used to answer ECDH.
    fn static_keys(&self) -> &StaticKeyPair;

    /// Resolve a client's `keyId` (from `MrpcSessionAuth`) to its public key.
    fn sender_public_key(&self, key_id: &str) -> Option<PublicKey>;

    /// Seconds a dormant session may be reused after this login (§3.1).
    fn session_reuse_time(&self) -> u64 {
        3600
    }

    /// Seconds a freshly derived session key remains valid (§3.1).
    fn key_valid_time(&self) -> u64 {
        600
    }

    /// Called once a login succeeds (§4.5.2 step 5). Default no-op.
    fn authenticated(&self, login: &str, hostname: &str, software: &str) {
        let _ = (login, hostname, software);
    }

    /// Called once a client-initiated key refresh lands (§4.5.4 step 5),
    /// after the new key is already derived and installed. Default no-op;
    /// an implementor can use this purely as an observation point.
    fn key_changed(&self, cipher: &str, key_name: &str) {
        let _ = (cipher, key_name);
    }

    /// PEM of the server's own public key — the `MrpcGetPublickey` reply.
    fn public_key_pem(&self) -> Result<String, EngineError> {
        mobs_crypto::keys::public_key_to_pem(&self.static_keys().secret().public_key())
            .map_err(|e| EngineError::Transform(e.to_string()))
    }
}

/// What [`MrpcEc::install_handshake_resolver`] found for a given `KeyName`:
/// either a brand new ECDH-derived key, or a whole cached [`Session`] to
/// adopt wholesale (reuse needs more than just the key — `session_id` and
/// `info` travel with it too, see `finish_login`).
enum NegotiatedKey {
    Fresh { key: [u8; 32], cipher: String },
    Reused(Session),
}

type Negotiated = Arc<Mutex<Option<NegotiatedKey>>>;

/// The MRPC-EC session engine (§3, §4.5).
pub struct MrpcEc<T: Transport> {
    transport: T,
    reader: XmlReader,
    state: EngineState,
    role: Role,
    /// Durable conversation state; cheap to clone out and hand to a cache or
    /// a reconnecting engine instance (§5).
    pub session: Session,
    authority: Option<Arc<dyn ServerAuthority>>,
    cache: Option<&'static SessionCache>,
    root_tag: &'static str,
    root_written: bool,
    negotiated: Negotiated,
    last_object: Option<Record>,
}

impl<T: Transport> MrpcEc<T> {
    /// A fresh client engine bound to `transport`. `session` may already
    /// carry a live key from a prior connection (§4.5.1's reuse fast path).
    pub fn new_client(transport: T, session: Session) -> Self {
        Self {
            transport,
            reader: XmlReader::new(),
            state: EngineState::Fresh,
            role: Role::Client,
            session,
            authority: None,
            cache: None,
            root_tag: "methodCall",
            root_written: false,
            negotiated: Arc::new(Mutex::new(None)),
            last_object: None,
        }
    }

    /// A fresh server engine bound to `transport`, answering with `authority`
    /// and sharing session state through `cache` (construct one per listener
    /// per [`SessionCache`]'s own doc comment, or pass [`crate::cache::global`]).
    pub fn new_server(transport: T, authority: Arc<dyn ServerAuthority>, cache: &'static SessionCache) -> Self {
        Self {
            transport,
            reader: XmlReader::new(),
            state: EngineState::Fresh,
            role: Role::Server,
            session: Session::default(),
            authority: Some(authority),
            cache: Some(cache),
            root_tag: "methodResponse",
            root_written: false,
            negotiated: Arc::new(Mutex::new(None)),
            last_object: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    // ---- transport pump -----------------------------------------------

    fn next_event(&mut self) -> Result<XmlEvent, EngineError> {
        loop {
            if let Some(ev) = self.reader.poll_event()? {
                return Ok(ev);
            }
            let mut chunk = Vec::new();
            let n = self.transport.recv(&mut chunk).map_err(|e| EngineError::Transport(e.to_string()))?;
            if n == 0 {
                self.reader.mark_closed();
                continue;
            }
            self.reader.feed(&chunk);
        }
    }

    fn read_dispatch(&mut self, routes: &[(&'static str, &'static [FieldDescriptor])]) -> Result<Record, EngineError> {
        wire::read_dispatch(|| self.next_event(), routes)
    }

    fn write_prologue_if_needed(&mut self) -> Result<(), EngineError> {
        if !self.root_written {
            let head = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<{}>", self.root_tag);
            self.transport.send(head.as_bytes()).map_err(|e| EngineError::Transport(e.to_string()))?;
            self.root_written = true;
        }
        Ok(())
    }

    fn send_plain<M: Traverse>(&mut self, msg: &M) -> Result<(), EngineError> {
        self.write_prologue_if_needed()?;
        let mut buf = Vec::new();
        {
            let mut w = XmlWriter::new(&mut buf);
            wire::write_record(&mut w, &msg.to_record())?;
        }
        self.transport.send(&buf).map_err(|e| EngineError::Transport(e.to_string()))
    }

    fn send_encrypted<M: Traverse>(&mut self, msg: &M, key_name: &str, session_key: [u8; 32]) -> Result<(), EngineError> {
        self.write_prologue_if_needed()?;
        let mut buf = Vec::new();
        {
            let mut w = XmlWriter::new(&mut buf);
            w.start_encrypt()?;
            wire::write_record(&mut w, &msg.to_record())?;
            let mut plugin = AesCryptBuf::new(session_key, key_name.to_string());
            w.stop_encrypt(key_name, &mut plugin)?;
        }
        self.transport.send(&buf).map_err(|e| EngineError::Transport(e.to_string()))
    }

    fn session_key(&self) -> Result<[u8; 32], EngineError> {
        self.session
            .session_key
            .clone()
            .try_into()
            .map_err(|_| EngineError::KeyLifecycle("no session key installed".to_string()))
    }

    /// Lock the reader onto one fixed key regardless of the `KeyName` a
    /// frame carries — both sides only ever decrypt under the single
    /// currently-installed key once past the handshake's key-negotiation
    /// step.
    fn install_fixed_resolver(&mut self, session_key: [u8; 32]) {
        self.reader.set_encrypt_resolver(move |_algorithm: &str, key_name: &str| {
            Ok(Box::new(AesCryptBuf::new(session_key, key_name.to_string())) as Box<dyn CryptBufBase>)
        });
    }

    /// Server-only: try cache reuse first, else treat `key_name` as a fresh
    /// ephemeral public key and run ECDH against the static key pair (§4.5.5).
    /// Reports whichever key actually got used back to [`Self::finish_login`]
    /// through `self.negotiated`, since `EncryptResolver: Send` rules out a
    /// non-`Send` side channel like `Rc<RefCell<_>>`.
    fn install_handshake_resolver(&mut self) {
        let negotiated = Arc::clone(&self.negotiated);
        let authority = Arc::clone(self.authority.as_ref().expect("handshake resolver is server-only"));
        let cache = self.cache.expect("handshake resolver is server-only");
        self.reader.set_encrypt_resolver(move |_algorithm: &str, key_name: &str| {
            if let Some(cached) = cache.get_live(key_name) {
                let key: [u8; 32] = cached
                    .session_key
                    .clone()
                    .try_into()
                    .map_err(|_| mobs_xml::XmlError::BadState("cached session key is not 32 bytes".to_string()))?;
                *negotiated.lock().expect("negotiated mutex poisoned") = Some(NegotiatedKey::Reused(cached));
                return Ok(Box::new(AesCryptBuf::new(key, key_name.to_string())) as Box<dyn CryptBufBase>);
            }
            let peer_der = mobs_codec::base64::decode_tolerant(key_name)
                .map_err(|e| mobs_xml::XmlError::BadState(e.to_string()))?;
            let key = authority
                .static_keys()
                .derive_session_key(&peer_der)
                .map_err(|e| mobs_xml::XmlError::BadState(e.to_string()))?;
            *negotiated.lock().expect("negotiated mutex poisoned") =
                Some(NegotiatedKey::Fresh { key, cipher: key_name.to_string() });
            Ok(Box::new(AesCryptBuf::new(key, key_name.to_string())) as Box<dyn CryptBufBase>)
        });
    }

    fn handle_return_error(&mut self, err: MrpcSessionReturnError) -> EngineError {
        log::warn!("[mrpc] peer returned error: {}", err.error);
        self.state = EngineState::Closing;
        match err.reserved_token() {
            Some(crate::error::KEY_EXPIRED) | Some(crate::error::PLS_RELOG) => {
                self.session = Session::default();
                EngineError::KeyLifecycle(err.error)
            }
            _ => EngineError::RemoteError(err.error),
        }
    }

    // ---- client handshake (§4.5.1) -------------------------------------

    /// Authenticate to the server, reusing the current session key if it is
    /// still live, else deriving a fresh one via ECDH against
    /// `server_pub_key` (SEC1/DER). `priv_key` signs the (possibly reused)
    /// session key to prove possession of `key_id`'s private half.
    ///
    /// `login`/`hostname` travel in `MrpcSessionAuth` alongside `key_id` and
    /// `software`; callers supply them explicitly rather than having the
    /// engine probe the local environment for them.
    pub fn start_session(
        &mut self,
        key_id: &str,
        login: &str,
        software: &str,
        hostname: &str,
        priv_key: &SecretKey,
        server_pub_key: &[u8],
    ) -> Result<(), EngineError> {
        if self.role != Role::Client {
            return Err(EngineError::WrongState { attempted: "start_session", state: "server role" });
        }
        if self.state != EngineState::Fresh {
            return Err(EngineError::WrongState { attempted: "start_session", state: state_name(self.state) });
        }

        if !self.session.has_key() || self.session.expired() {
            log::debug!("[mrpc] no live session key for {key_id}, running ECDH");
            let ephemeral = Ephemeral::generate();
            let session_key = ephemeral
                .derive_session_key(server_pub_key)
                .map_err(|e| EngineError::KeyLifecycle(e.to_string()))?;
            let cipher = mobs_codec::base64::encode_wrapped(&ephemeral.public_der());
            self.session.install_fresh_key(session_key, cipher);
        } else {
            log::debug!("[mrpc] reusing live session key for {key_id}");
        }

        self.write_prologue_if_needed()?;
        let session_key = self.session_key()?;
        let key_name = self.session.info.clone();
        let auth = sign::sign(priv_key, &session_key);
        let msg = MrpcSessionAuth {
            key_id: key_id.to_string(),
            login: login.to_string(),
            software: software.to_string(),
            hostname: hostname.to_string(),
            auth,
        };
        self.send_encrypted(&msg, &key_name, session_key)?;
        self.install_fixed_resolver(session_key);
        self.state = EngineState::ConnectingClient;
        log::debug!("[mrpc] {} -> {}", state_name(EngineState::Fresh), state_name(self.state));
        Ok(())
    }

    /// Block for the server's `MrpcSessionLoginResult` (or
    /// `MrpcSessionReturnError` on rejection) and adopt the negotiated
    /// session id and lifetimes.
    pub fn finish_session(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::ConnectingClient {
            return Err(EngineError::WrongState { attempted: "finish_session", state: state_name(self.state) });
        }
        let routes: &[(&'static str, &'static [FieldDescriptor])] = &[
            (MrpcSessionLoginResult::TYPE_NAME, MrpcSessionLoginResult::descriptor()),
            (MrpcSessionReturnError::TYPE_NAME, MrpcSessionReturnError::descriptor()),
        ];
        let record = self.read_dispatch(routes)?;
        if record.type_name == MrpcSessionReturnError::TYPE_NAME {
            let err = MrpcSessionReturnError::from_record(&record)?;
            return Err(self.handle_return_error(err));
        }
        let result = MrpcSessionLoginResult::from_record(&record)?;
        self.session.session_id = result.sess_id;
        self.session.session_reuse_time = result.session_reuse_time;
        self.session.key_valid_time = result.session_key_valid_time;
        self.session.touch();
        self.state = EngineState::Connected;
        log::info!("[mrpc] session established, id={}", self.session.session_id);
        Ok(())
    }

    /// Ask the server for its long-term public key PEM, unauthenticated
    /// (§4.5's public-key-fetch scenario). Pair with [`Self::recv_public_key`].
    pub fn get_public_key(&mut self) -> Result<(), EngineError> {
        if self.role != Role::Client {
            return Err(EngineError::WrongState { attempted: "get_public_key", state: "server role" });
        }
        if self.state != EngineState::Fresh {
            return Err(EngineError::WrongState { attempted: "get_public_key", state: state_name(self.state) });
        }
        self.send_plain(&MrpcGetPublickey::default())?;
        self.state = EngineState::GetPubKey;
        Ok(())
    }

    pub fn recv_public_key(&mut self) -> Result<String, EngineError> {
        if self.state != EngineState::GetPubKey {
            return Err(EngineError::WrongState { attempted: "recv_public_key", state: state_name(self.state) });
        }
        let record = self.read_dispatch(&[(MrpcGetPublickey::TYPE_NAME, MrpcGetPublickey::descriptor())])?;
        let reply = MrpcGetPublickey::from_record(&record)?;
        let pem = reply.pubkey.ok_or_else(|| EngineError::Protocol("server returned no public key".to_string()))?;
        self.session.public_server_key = pem.clone();
        self.state = EngineState::Fresh;
        Ok(pem)
    }

    /// Rekey proactively (§4.5.4): derive a new session key via ECDH against
    /// `server_pub_key`, announce it under the *current* key, then switch.
    pub fn client_refresh_key(&mut self, server_pub_key: &[u8]) -> Result<(), EngineError> {
        if self.role != Role::Client {
            return Err(EngineError::WrongState { attempted: "client_refresh_key", state: "server role" });
        }
        if !self.state.is_established() {
            return Err(EngineError::WrongState { attempted: "client_refresh_key", state: state_name(self.state) });
        }
        log::info!("[mrpc] client refreshing session key");
        let current_key = self.session_key()?;
        let current_name = self.session.info.clone();
        let ephemeral = Ephemeral::generate();
        let new_key = ephemeral
            .derive_session_key(server_pub_key)
            .map_err(|e| EngineError::KeyLifecycle(e.to_string()))?;
        let new_cipher = mobs_codec::base64::encode_wrapped(&ephemeral.public_der());
        let msg = MrpcNewEphemeralKey { key: ephemeral.public_der() };
        self.send_encrypted(&msg, &current_name, current_key)?;
        self.session.install_fresh_key(new_key, new_cipher);
        self.install_fixed_resolver(new_key);
        Ok(())
    }

    // ---- server handshake (§4.5.2) --------------------------------------

    /// Drive the server side of the handshake to completion: write the
    /// prologue, answer any `MrpcGetPublickey` probes inline, then validate
    /// the client's `MrpcSessionAuth` and reply with
    /// `MrpcSessionLoginResult` (or reject with `MrpcSessionReturnError`).
    pub fn accept_login(&mut self) -> Result<(), EngineError> {
        if self.role != Role::Server {
            return Err(EngineError::WrongState { attempted: "accept_login", state: "client role" });
        }
        if self.state != EngineState::Fresh {
            return Err(EngineError::WrongState { attempted: "accept_login", state: state_name(self.state) });
        }
        log::debug!("[mrpc] server awaiting login");
        self.reader.set_max_element_size(mobs_xml::HANDSHAKE_MAX_ELEMENT_SIZE);
        self.write_prologue_if_needed()?;
        self.state = EngineState::ConnectingServer;
        self.install_handshake_resolver();

        loop {
            let routes: &[(&'static str, &'static [FieldDescriptor])] = &[
                (MrpcSessionAuth::TYPE_NAME, MrpcSessionAuth::descriptor()),
                (MrpcGetPublickey::TYPE_NAME, MrpcGetPublickey::descriptor()),
            ];
            let record = self.read_dispatch(routes)?;
            if record.type_name == MrpcGetPublickey::TYPE_NAME {
                let pem = self.authority.as_ref().expect("server role").public_key_pem()?;
                self.send_plain(&MrpcGetPublickey { pubkey: Some(pem) })?;
                continue;
            }
            let auth = MrpcSessionAuth::from_record(&record)?;
            return self.finish_login(auth);
        }
    }

    /// Answer a single, standalone `MrpcGetPublickey` request — the shape of
    /// a connection that only ever wants the server's public key and never
    /// logs in.
    pub fn serve_public_key_request(&mut self) -> Result<(), EngineError> {
        if self.role != Role::Server {
            return Err(EngineError::WrongState { attempted: "serve_public_key_request", state: "client role" });
        }
        self.write_prologue_if_needed()?;
        let _request = self.read_dispatch(&[(MrpcGetPublickey::TYPE_NAME, MrpcGetPublickey::descriptor())])?;
        let pem = self.authority.as_ref().expect("server role").public_key_pem()?;
        self.send_plain(&MrpcGetPublickey { pubkey: Some(pem) })
    }

    fn finish_login(&mut self, auth: MrpcSessionAuth) -> Result<(), EngineError> {
        let authority = Arc::clone(self.authority.as_ref().expect("server role"));
        let negotiated = self
            .negotiated
            .lock()
            .expect("negotiated mutex poisoned")
            .take()
            .ok_or_else(|| EngineError::Protocol("no key negotiated during auth".to_string()))?;

        let (session_key, cipher, reused, cached_session) = match negotiated {
            NegotiatedKey::Fresh { key, cipher } => (key, cipher, false, None),
            NegotiatedKey::Reused(cached) => {
                let key: [u8; 32] = cached
                    .session_key
                    .clone()
                    .try_into()
                    .map_err(|_| EngineError::KeyLifecycle("cached session key is not 32 bytes".to_string()))?;
                let cipher = cached.info.clone();
                (key, cipher, true, Some(cached))
            }
        };

        let sender_pub = authority.sender_public_key(&auth.key_id);
        let verified = sender_pub.as_ref().is_some_and(|pk| sign::verify(pk, &session_key, &auth.auth).is_ok());
        if !verified {
            log::warn!("[mrpc] login rejected: keyId `{}` did not verify", auth.key_id);
            self.send_plain(&MrpcSessionReturnError::new("auth failed"))?;
            self.state = EngineState::Closing;
            return Err(EngineError::AuthFailed(format!("keyId `{}` did not verify", auth.key_id)));
        }

        if let Some(cached) = cached_session {
            self.session = cached;
            self.session.touch();
        } else {
            self.session.install_fresh_key(session_key, cipher.clone());
            self.session.session_id = next_session_id();
        }
        self.session.key_name = auth.key_id.clone();
        self.session.session_reuse_time = authority.session_reuse_time();
        self.session.key_valid_time = authority.key_valid_time();
        self.cache.expect("server role").put(self.session.clone());

        self.install_fixed_resolver(session_key);
        let result = MrpcSessionLoginResult {
            sess_id: self.session.session_id,
            session_reuse_time: self.session.session_reuse_time,
            session_key_valid_time: self.session.key_valid_time,
        };
        self.send_encrypted(&result, &cipher, session_key)?;
        self.reader.set_max_element_size(DEFAULT_MAX_ELEMENT_SIZE);
        log::info!(
            "[mrpc] login accepted: {}@{} (sess_id={}, reused_key={reused})",
            auth.login,
            auth.hostname,
            self.session.session_id
        );
        authority.authenticated(&auth.login, &auth.hostname, &auth.software);
        self.state = EngineState::ConnectingServerConfirmed;
        Ok(())
    }

    fn apply_server_key_refresh(&mut self, refresh: MrpcNewEphemeralKey) -> Result<(), EngineError> {
        let authority = Arc::clone(self.authority.as_ref().expect("server role"));
        let new_key = authority
            .static_keys()
            .derive_session_key(&refresh.key)
            .map_err(|e| EngineError::KeyLifecycle(e.to_string()))?;
        let new_cipher = mobs_codec::base64::encode_wrapped(&refresh.key);
        self.session.install_fresh_key(new_key, new_cipher);
        self.session.session_reuse_time = authority.session_reuse_time();
        self.session.key_valid_time = authority.key_valid_time();
        self.cache.expect("server role").put(self.session.clone());
        self.install_fixed_resolver(new_key);
        log::info!("[mrpc] server applied client-initiated key refresh (sess_id={})", self.session.session_id);
        authority.key_changed(&self.session.info, &self.session.key_name);
        Ok(())
    }

    // ---- steady state (§4.5.3) ------------------------------------------

    /// Send one application object under the current session key.
    pub fn send<M: Traverse>(&mut self, msg: &M) -> Result<(), EngineError> {
        if !self.state.is_established() {
            return Err(EngineError::WrongState { attempted: "send", state: state_name(self.state) });
        }
        let session_key = self.session_key()?;
        let key_name = match self.role {
            Role::Client => self.session.info.clone(),
            Role::Server => self.session.key_name.clone(),
        };
        self.session.touch();
        self.send_encrypted(msg, &key_name, session_key)
    }

    /// Block for the next application object of type `M`. A
    /// `MrpcNewEphemeralKey` arriving in its place is applied transparently
    /// (server side) and does not satisfy the call; `MrpcSessionReturnError`
    /// ends the conversation.
    pub fn recv<M: Traverse>(&mut self) -> Result<M, EngineError> {
        if !self.state.is_established() {
            return Err(EngineError::WrongState { attempted: "recv", state: state_name(self.state) });
        }
        loop {
            if self.state == EngineState::ReadyRead {
                self.state = EngineState::Connected;
            }
            let routes: &[(&'static str, &'static [FieldDescriptor])] = &[
                (M::TYPE_NAME, M::descriptor()),
                (MrpcNewEphemeralKey::TYPE_NAME, MrpcNewEphemeralKey::descriptor()),
                (MrpcSessionReturnError::TYPE_NAME, MrpcSessionReturnError::descriptor()),
            ];
            let record = self.read_dispatch(routes)?;
            match record.type_name.as_str() {
                MrpcSessionReturnError::TYPE_NAME => {
                    let err = MrpcSessionReturnError::from_record(&record)?;
                    return Err(self.handle_return_error(err));
                }
                MrpcNewEphemeralKey::TYPE_NAME if self.role == Role::Server => {
                    let refresh = MrpcNewEphemeralKey::from_record(&record)?;
                    self.apply_server_key_refresh(refresh)?;
                    self.state = EngineState::ReadyRead;
                    continue;
                }
                _ => {
                    self.session.touch();
                    let result = M::from_record(&record)?;
                    self.last_object = Some(record);
                    self.state = EngineState::ReadyRead;
                    return Ok(result);
                }
            }
        }
    }

    /// Downcast the most recently [`Self::recv`]'d object to `M`, or `None`
    /// if nothing has been received yet or the last object was a different
    /// type.
    pub fn get_result<M: Traverse>(&self) -> Option<M> {
        self.last_object.as_ref().filter(|r| r.type_name == M::TYPE_NAME).and_then(|r| M::from_record(r).ok())
    }

    // ---- attachments (§3.4, §4.5.7) --------------------------------------

    /// Write `data` as an encrypted attachment substream under the current
    /// session key. Returns the ciphertext byte count written.
    pub fn out_byte_stream(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        if !self.state.is_established() {
            return Err(EngineError::WrongState { attempted: "out_byte_stream", state: state_name(self.state) });
        }
        self.write_prologue_if_needed()?;
        let session_key = self.session_key()?;
        let key_name = self.session.info.clone();
        let mut buf = Vec::new();
        let n = {
            let mut w = XmlWriter::new(&mut buf);
            attachment::write_attachment(&mut w, session_key, &key_name, data)?
        };
        self.transport.send(&buf).map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(n)
    }

    /// Read back one attachment substream written by the peer's
    /// [`Self::out_byte_stream`]. Only valid between elements — never while
    /// a `recv`/`read_dispatch` call is mid-element. `len` is the plaintext
    /// byte count, advised out-of-band by the preceding application message
    /// (§3.4/§4.5.7) — e.g. a `length` field the caller's own message type
    /// carries.
    pub fn in_byte_stream(&mut self, len: usize) -> Result<Vec<u8>, EngineError> {
        if !self.state.is_established() {
            return Err(EngineError::WrongState { attempted: "in_byte_stream", state: state_name(self.state) });
        }
        let session_key = self.session_key()?;
        let mut pending = self.reader.take_unconsumed();
        let data = attachment::read_attachment(&mut self.transport, session_key, &mut pending, len)?;
        self.reader.feed(&pending);
        Ok(data)
    }

    /// End the conversation: close the root element and stop accepting
    /// further traffic.
    pub fn close(&mut self) -> Result<(), EngineError> {
        log::debug!("[mrpc] closing (sess_id={})", self.session.session_id);
        if self.root_written && !self.state.is_terminal() {
            let tail = format!("</{}>", self.root_tag);
            self.transport.send(tail.as_bytes()).map_err(|e| EngineError::Transport(e.to_string()))?;
        }
        self.state = EngineState::Closing;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use mobs_types::{FieldDescriptor, FieldKind, Record, ScalarHint, Value};

    use super::*;

    const TEXT: FieldDescriptor = FieldDescriptor {
        name: "text",
        alt_name: None,
        key_ordinal: None,
        as_attribute: false,
        nullable: false,
        encrypted: false,
        kind: FieldKind::Scalar(ScalarHint::PlainString),
    };

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct PingMessage {
        text: String,
    }

    impl Traverse for PingMessage {
        const TYPE_NAME: &'static str = "PingMessage";

        fn descriptor() -> &'static [FieldDescriptor] {
            &[TEXT]
        }

        fn to_record(&self) -> Record {
            let mut r = Record::new(Self::TYPE_NAME);
            r.push(TEXT, Value::Str(self.text.clone()));
            r
        }

        fn from_record(record: &Record) -> Result<Self, mobs_types::Error> {
            Ok(Self {
                text: record
                    .get_required("text")?
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| mobs_types::Error::TypeMismatch { field: "text".to_string(), expected: "string" })?,
            })
        }
    }

    struct TestAuthority {
        keys: StaticKeyPair,
        client_pub: PublicKey,
    }

    impl ServerAuthority for TestAuthority {
        fn static_keys(&self) -> &StaticKeyPair {
            &self.keys
        }

        fn sender_public_key(&self, key_id: &str) -> Option<PublicKey> {
            (key_id == "test-client").then(|| self.client_pub.clone())
        }
    }

    #[test]
    fn handshake_then_round_trip() {
        let (client_sock, server_sock) = UnixStream::pair().unwrap();

        let server_keys = StaticKeyPair::generate();
        let server_pub_der = server_keys.public_der();
        let client_keys = StaticKeyPair::generate();
        let client_pub = PublicKey::from_sec1_bytes(&client_keys.public_der()).unwrap();

        let authority: Arc<dyn ServerAuthority> =
            Arc::new(TestAuthority { keys: server_keys, client_pub: client_pub.clone() });
        let cache: &'static SessionCache = Box::leak(Box::new(SessionCache::new()));

        let server_thread = std::thread::spawn(move || {
            let mut server = MrpcEc::new_server(server_sock, authority, cache);
            server.accept_login().unwrap();
            let ping: PingMessage = server.recv().unwrap();
            server.send(&ping).unwrap();
        });

        let mut client = MrpcEc::new_client(client_sock, Session::new("test-server"));
        client
            .start_session("test-client", "alice", "test-suite", "localhost", client_keys.secret(), &server_pub_der)
            .unwrap();
        client.finish_session().unwrap();
        assert_eq!(client.state(), EngineState::Connected);

        client.send(&PingMessage { text: "hello".to_string() }).unwrap();
        let reply: PingMessage = client.recv().unwrap();
        assert_eq!(reply.text, "hello");

        client.close().unwrap();
        server_thread.join().unwrap();
    }

    #[test]
    fn auth_failure_is_rejected() {
        let (client_sock, server_sock) = UnixStream::pair().unwrap();

        let server_keys = StaticKeyPair::generate();
        let server_pub_der = server_keys.public_der();
        // A different client key pair than the one the authority recognizes.
        let client_keys = StaticKeyPair::generate();
        let stranger_pub = PublicKey::from_sec1_bytes(&StaticKeyPair::generate().public_der()).unwrap();

        let authority: Arc<dyn ServerAuthority> =
            Arc::new(TestAuthority { keys: server_keys, client_pub: stranger_pub });
        let cache: &'static SessionCache = Box::leak(Box::new(SessionCache::new()));

        let server_thread = std::thread::spawn(move || {
            let mut server = MrpcEc::new_server(server_sock, authority, cache);
            server.accept_login()
        });

        let mut client = MrpcEc::new_client(client_sock, Session::new("test-server"));
        client
            .start_session("test-client", "alice", "test-suite", "localhost", client_keys.secret(), &server_pub_der)
            .unwrap();
        assert!(client.finish_session().is_err());

        assert!(server_thread.join().unwrap().is_err());
    }
}
