//! Live browser sessions.
//!
//! The supervisor holds target→sessions and session→target by
//! identifier only; there are no strong back-links through data
//! structures, and a session is removed from both sides on disconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::inject::ArtifactMeta;

/// Opaque identifier of one websocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    pub fn next() -> SessionId {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a session last received, for reload verdicts and reconnects.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub compiled_at: u64,
    pub meta: ArtifactMeta,
}

/// Per-session state owned by the supervisor.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub target: String,
    /// Last time the client reported tab focus.
    #[allow(dead_code)] // Reserved for focus-based scheduling
    pub focused_at: Option<Instant>,
    pub delivered: Option<Delivered>,
}

/// Bidirectional registry: sessions by id and ids by target name.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    by_id: FxHashMap<SessionId, Session>,
    by_target: FxHashMap<String, Vec<SessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: SessionId, target: &str) {
        self.by_id.insert(
            id,
            Session {
                id,
                target: target.to_string(),
                focused_at: None,
                delivered: None,
            },
        );
        self.by_target.entry(target.to_string()).or_default().push(id);
    }

    /// Remove from both sides. Unknown ids are a no-op (disconnect can
    /// race removal on restart).
    pub fn remove(&mut self, id: SessionId) {
        if let Some(session) = self.by_id.remove(&id)
            && let Some(ids) = self.by_target.get_mut(&session.target)
        {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_target.remove(&session.target);
            }
        }
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.by_id.get_mut(&id)
    }

    /// Does any session watch this target?
    pub fn has_session(&self, target: &str) -> bool {
        self.by_target.contains_key(target)
    }

    /// Session ids subscribed to a target.
    pub fn sessions_for(&self, target: &str) -> Vec<SessionId> {
        self.by_target.get(target).cloned().unwrap_or_default()
    }

    /// All session ids (project restart sweep).
    pub fn all_ids(&self) -> Vec<SessionId> {
        self.by_id.values().map(|session| session.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_both_sides() {
        let mut registry = SessionRegistry::new();
        let a = SessionId::next();
        let b = SessionId::next();
        registry.add(a, "Html");
        registry.add(b, "Html");

        assert!(registry.has_session("Html"));
        assert_eq!(registry.sessions_for("Html").len(), 2);

        registry.remove(a);
        assert_eq!(registry.sessions_for("Html"), vec![b]);

        registry.remove(b);
        assert!(!registry.has_session("Html"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry = SessionRegistry::new();
        registry.remove(SessionId::next());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_sessions_for_unknown_target_is_empty() {
        let registry = SessionRegistry::new();
        assert!(registry.sessions_for("Nope").is_empty());
        assert!(!registry.has_session("Nope"));
    }
}
