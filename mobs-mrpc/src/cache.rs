//! Process-wide server session cache (§5, §9 "Global session cache").
//!
//! Keyed by the ephemeral-cipher base64 (`Session.info`, the same value that
//! travels as `KeyInfo/KeyName` on the login frame). Mutation is serialized
//! by a single mutex, matching the spec's "inserts, expiry sweeps, and
//! lookups all under one lock" — an injected cache would satisfy §9's
//! alternative just as well, but a static map is the direct translation of
//! the source's contract.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::session::Session;

/// The server-side session cache. Construct one per listener; the reference
/// `mobs-srv` binary keeps a single instance for the process per §9.
#[derive(Default)]
pub struct SessionCache {
    entries: Mutex<HashMap<String, Session>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look the cipher up, evicting it first if it has expired (§4.5.5:
    /// "cache entries expire per §3.1", swept "during each auth attempt").
    pub fn get_live(&self, cipher: &str) -> Option<Session> {
        let mut map = self.entries.lock().expect("session cache mutex poisoned");
        match map.get(cipher) {
            Some(s) if s.expired() => {
                map.remove(cipher);
                None
            }
            Some(s) => Some(s.clone()),
            None => None,
        }
    }

    /// Insert or replace the cached session under its `info` cipher key.
    pub fn put(&self, session: Session) {
        let mut map = self.entries.lock().expect("session cache mutex poisoned");
        map.insert(session.info.clone(), session);
    }

    /// Drop every expired entry; called opportunistically on each new login.
    pub fn sweep(&self) {
        let mut map = self.entries.lock().expect("session cache mutex poisoned");
        map.retain(|_, s| !s.expired());
    }

    pub fn remove(&self, cipher: &str) {
        self.entries.lock().expect("session cache mutex poisoned").remove(cipher);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("session cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL: OnceLock<SessionCache> = OnceLock::new();

/// The process-wide cache singleton (§9: "lifecycle bound to server
/// process"). Reference binaries that want an isolated cache per listener
/// should construct their own [`SessionCache`] instead.
pub fn global() -> &'static SessionCache {
    GLOBAL.get_or_init(SessionCache::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_live_roundtrips() {
        let cache = SessionCache::new();
        let mut s = Session::new("h:1");
        s.info = "cipher-abc".to_string();
        s.session_key = vec![9; 32];
        s.generated = 1_000_000_000;
        cache.put(s);
        assert!(cache.get_live("cipher-abc").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entry_is_evicted_on_lookup() {
        let cache = SessionCache::new();
        let mut s = Session::new("h:1");
        s.info = "cipher-xyz".to_string();
        s.session_key = vec![9; 32];
        s.generated = 1;
        s.key_valid_time = 1;
        cache.put(s);
        assert!(cache.get_live("cipher-xyz").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn miss_returns_none() {
        let cache = SessionCache::new();
        assert!(cache.get_live("no-such-cipher").is_none());
    }
}
