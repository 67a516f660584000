use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use crate::tprintln;

use super::principal::UserIdentity;

pub type SessionId = String;

/// Local mirror of an authenticated identity.
///
/// Serialized as `{"user": {...}, "login_time": <unix seconds>}`, which is how the rest of
/// the request handling sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalSession {
    pub user: UserIdentity,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub login_time: DateTime<Utc>,
}

/// One client's view of its local session record.
pub trait SessionStore: Send {
    fn current(&self) -> Option<&LocalSession>;
    fn establish(&mut self, session: LocalSession);
    /// Remove the record. Returns whether one existed.
    fn destroy(&mut self) -> bool;

    fn exists(&self) -> bool { self.current().is_some() }
}

/// Per-request session view, loaded from and committed back to a `SessionRegistry`.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    record: Option<LocalSession>,
    dirty: bool,
}

impl SessionSlot {
    pub fn new(record: Option<LocalSession>) -> Self { Self { record, dirty: false } }

    /// True when `establish` or a successful `destroy` ran since the slot was loaded.
    pub fn is_dirty(&self) -> bool { self.dirty }

    pub fn into_record(self) -> Option<LocalSession> { self.record }
}

impl SessionStore for SessionSlot {
    fn current(&self) -> Option<&LocalSession> { self.record.as_ref() }

    fn establish(&mut self, session: LocalSession) {
        self.record = Some(session);
        self.dirty = true;
    }

    fn destroy(&mut self) -> bool {
        let existed = self.record.take().is_some();
        if existed { self.dirty = true; }
        existed
    }
}

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct SessionEntry {
    session: LocalSession,
    expires_at: Instant,
}

/// Server-wide map of session id -> local session.
///
/// Entries expire `ttl` after they were last written. Expired entries read as absent and
/// are dropped on the next `commit` or `sweep`.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
    ttl: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self { Self::with_ttl(DEFAULT_SESSION_TTL) }
}

impl SessionRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())), ttl }
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    pub async fn load(&self, sid: &str) -> SessionSlot {
        SessionSlot::new(self.get(sid).await)
    }

    /// Write a slot back. Clean slots are left alone so a concurrent request's result is
    /// not overwritten with a stale copy.
    pub async fn commit(&self, sid: &str, slot: SessionSlot) {
        if !slot.is_dirty() { return; }
        let now = Instant::now();
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, e| e.expires_at > now);
        let pruned = before - map.len();
        if pruned > 0 { tracing::debug!(target: "gatekeeper", pruned = pruned, "expired local sessions pruned"); }
        match slot.into_record() {
            Some(rec) => {
                tprintln!("session.commit sid={} role={}", sid_hint(sid), rec.user.role);
                map.insert(sid.to_string(), SessionEntry { session: rec, expires_at: now + self.ttl });
            }
            None => {
                tprintln!("session.commit sid={} removed", sid_hint(sid));
                map.remove(sid);
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, e| e.expires_at > now);
        before - map.len()
    }

    pub async fn remove(&self, sid: &str) -> bool {
        self.inner.write().await.remove(sid).is_some()
    }

    pub async fn get(&self, sid: &str) -> Option<LocalSession> {
        let now = Instant::now();
        let map = self.inner.read().await;
        map.get(sid).filter(|e| e.expires_at > now).map(|e| e.session.clone())
    }

    /// Stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize { self.inner.read().await.len() }

    pub async fn is_empty(&self) -> bool { self.inner.read().await.is_empty() }
}

/// Short, non-reusable prefix of a session id for debug output.
pub fn sid_hint(sid: &str) -> &str {
    match sid.char_indices().nth(6) {
        Some((i, _)) => &sid[..i],
        None => sid,
    }
}

/// 128-bit random session id, hex encoded.
pub fn new_session_id() -> anyhow::Result<SessionId> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow::anyhow!("session id entropy: {}", e))?;
    let mut sid = String::with_capacity(32);
    use std::fmt::Write as _;
    for b in &bytes { let _ = write!(&mut sid, "{:02x}", b); }
    Ok(sid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn admin_session() -> LocalSession {
        LocalSession {
            user: UserIdentity::new("natalya", "admin"),
            login_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn local_session_wire_shape() {
        let v = serde_json::to_value(admin_session()).unwrap();
        assert_eq!(v["user"]["role"], "admin");
        assert_eq!(v["login_time"], 1_700_000_000);
    }

    #[test]
    fn slot_tracks_changes() {
        let mut slot = SessionSlot::new(None);
        assert!(!slot.destroy());
        assert!(!slot.is_dirty());
        slot.establish(admin_session());
        assert!(slot.exists());
        assert!(slot.is_dirty());
        assert!(slot.destroy());
        assert!(!slot.exists());
    }

    #[tokio::test]
    async fn registry_commit_and_remove() {
        let reg = SessionRegistry::new();
        let mut slot = reg.load("a").await;
        slot.establish(admin_session());
        reg.commit("a", slot).await;
        assert_eq!(reg.get("a").await, Some(admin_session()));

        // clean slot does not clobber
        let clean = SessionSlot::new(None);
        reg.commit("a", clean).await;
        assert!(reg.get("a").await.is_some());

        let mut slot = reg.load("a").await;
        slot.destroy();
        reg.commit("a", slot).await;
        assert!(reg.is_empty().await);
        assert!(!reg.remove("a").await);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent_and_get_swept() {
        let reg = SessionRegistry::with_ttl(Duration::from_millis(50));
        for sid in ["a", "b", "c"] {
            let mut slot = reg.load(sid).await;
            slot.establish(admin_session());
            reg.commit(sid, slot).await;
        }
        assert_eq!(reg.len().await, 3);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(reg.get("a").await.is_none());
        assert!(!reg.load("a").await.exists());
        assert_eq!(reg.sweep().await, 3);
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn commit_prunes_expired_entries() {
        let reg = SessionRegistry::with_ttl(Duration::from_millis(50));
        let mut slot = reg.load("old").await;
        slot.establish(admin_session());
        reg.commit("old", slot).await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        let mut slot = reg.load("new").await;
        slot.establish(admin_session());
        reg.commit("new", slot).await;
        assert_eq!(reg.len().await, 1);
        assert!(reg.get("new").await.is_some());
    }

    #[test]
    fn sid_hint_is_a_short_prefix() {
        let sid = new_session_id().unwrap();
        let hint = sid_hint(&sid);
        assert_eq!(hint.len(), 6);
        assert!(sid.starts_with(hint));
        assert_eq!(sid_hint("abc"), "abc");
    }

    #[test]
    fn session_ids_are_unique_hex() {
        let a = new_session_id().unwrap();
        let b = new_session_id().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
