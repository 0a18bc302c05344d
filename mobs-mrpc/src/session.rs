//! [`Session`] — the mutable state of one logical conversation (§3.1).
//!
//! Cheap to create, reused across reconnects: §5 says "another engine
//! instance representing a reconnect receives a pointer to the same
//! `Session`", so callers typically hold it behind an `Arc<Mutex<_>>` and
//! hand a clone of the pointer to each [`crate::engine::MrpcEc`].

use std::time::{SystemTime, UNIX_EPOCH};

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
}

/// One logical client↔server conversation's durable state (§3.1).
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub server_endpoint: String,
    /// 32 bytes for AES-256; empty ⇒ unestablished.
    pub session_key: Vec<u8>,
    /// Opaque identifier of the peer key used at login (server lookup).
    pub key_name: String,
    /// 32-bit server-assigned handle; 0 ⇒ unassigned.
    pub session_id: u32,
    /// Wall-clock seconds of last traffic.
    pub last_used: u64,
    /// Wall-clock seconds when `session_key` was derived.
    pub generated: u64,
    /// Server: free-form description of the authenticated principal.
    /// Client: last ephemeral-key cipher (base64) — the cache key.
    pub info: String,
    /// PEM of the server's long-term public key (client-held).
    pub public_server_key: String,
    /// Seconds a dormant session may be reused (0 disables).
    pub session_reuse_time: u64,
    /// Seconds a derived key is accepted (0 disables expiry).
    pub key_valid_time: u64,
}

impl Session {
    /// A fresh, unestablished session bound to `server_endpoint`.
    pub fn new(server_endpoint: impl Into<String>) -> Self {
        Self { server_endpoint: server_endpoint.into(), ..Self::default() }
    }

    /// `session_key` non-empty ⇔ `generated != 0` (§3.1 invariant).
    pub fn has_key(&self) -> bool {
        !self.session_key.is_empty()
    }

    /// `expired()` per §3.1: unestablished, or the key has aged past
    /// `key_valid_time`, or the session sat idle past `session_reuse_time`.
    pub fn expired(&self) -> bool {
        self.expired_at(now())
    }

    fn expired_at(&self, now: u64) -> bool {
        if self.session_key.is_empty() {
            return true;
        }
        if self.key_valid_time > 0 && self.generated.saturating_add(self.key_valid_time) <= now {
            return true;
        }
        if self.session_reuse_time > 0 && self.last_used.saturating_add(self.session_reuse_time) <= now {
            return true;
        }
        false
    }

    /// `key_needs_refresh()` per §3.1: only meaningful once `key_valid_time`
    /// is at least 10s (shorter validities aren't worth proactively
    /// refreshing); true once 80% of the validity window has elapsed.
    pub fn key_needs_refresh(&self) -> bool {
        self.key_needs_refresh_at(now())
    }

    fn key_needs_refresh_at(&self, now: u64) -> bool {
        if self.key_valid_time < 10 {
            return false;
        }
        let elapsed = now.saturating_sub(self.generated);
        elapsed.saturating_mul(5) >= self.key_valid_time.saturating_mul(4)
    }

    /// Record that the session was just used for traffic.
    pub fn touch(&mut self) {
        self.last_used = now();
    }

    /// Install a freshly derived key (§4.5.1 step 2 / §4.5.2): clears the
    /// server-negotiated lifetimes, since the server reassigns them.
    pub fn install_fresh_key(&mut self, session_key: [u8; 32], cipher_base64: String) {
        self.session_key = session_key.to_vec();
        self.info = cipher_base64;
        self.generated = now();
        self.session_reuse_time = 0;
        self.key_valid_time = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_expired() {
        assert!(Session::new("host:1234").expired());
    }

    #[test]
    fn keyed_session_not_expired_when_lifetimes_are_zero() {
        let mut s = Session::new("host:1234");
        s.session_key = vec![1; 32];
        s.generated = 100;
        s.last_used = 100;
        assert!(!s.expired_at(10_000));
    }

    #[test]
    fn key_valid_time_expiry() {
        let mut s = Session::new("host:1234");
        s.session_key = vec![1; 32];
        s.generated = 1000;
        s.key_valid_time = 60;
        assert!(!s.expired_at(1059));
        assert!(s.expired_at(1060));
    }

    #[test]
    fn session_reuse_time_expiry() {
        let mut s = Session::new("host:1234");
        s.session_key = vec![1; 32];
        s.generated = 1000;
        s.last_used = 2000;
        s.session_reuse_time = 100;
        assert!(!s.expired_at(2099));
        assert!(s.expired_at(2100));
    }

    #[test]
    fn key_needs_refresh_below_threshold() {
        let mut s = Session::new("host");
        s.key_valid_time = 100;
        s.generated = 1000;
        assert!(!s.key_needs_refresh_at(1079));
        assert!(s.key_needs_refresh_at(1080));
    }

    #[test]
    fn key_needs_refresh_never_fires_under_ten_second_validity() {
        let mut s = Session::new("host");
        s.key_valid_time = 9;
        s.generated = 0;
        assert!(!s.key_needs_refresh_at(1_000_000));
    }
}
