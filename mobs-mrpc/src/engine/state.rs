//! [`EngineState`] and its transition table (§3.2).

/// Where a [`crate::engine::MrpcEc`] sits in its handshake/steady-state
/// lifecycle. Client and server share the enum; each side only ever visits
/// a subset of the variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// No traffic has flowed yet.
    Fresh,
    /// Client: `get_public_key()` sent, awaiting `MrpcGetPublickey` reply.
    GetPubKey,
    /// Server: prologue written, awaiting/validating the client's auth frame.
    ConnectingServer,
    /// Server: auth succeeded, `MrpcSessionLoginResult` sent.
    ConnectingServerConfirmed,
    /// Client: auth frame sent, awaiting `MrpcSessionLoginResult`.
    ConnectingClient,
    /// Handshake complete; no unconsumed application object pending.
    Connected,
    /// An application object has been fully consumed (client) or the
    /// encryption frame has closed (server) and the peer may proceed.
    ReadyRead,
    /// Terminal: end-of-root or a fatal error. No further traffic.
    Closing,
}

impl EngineState {
    /// True once the handshake has produced a live session key, regardless
    /// of which side is asking.
    pub fn is_established(self) -> bool {
        matches!(self, Self::ConnectingServerConfirmed | Self::Connected | Self::ReadyRead)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing)
    }
}
