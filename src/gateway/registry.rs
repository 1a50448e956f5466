use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;

use super::events;
use super::session::Session;

/// All sessions the process knows about, live or inside their resume grace
/// window. Explicitly owned and injected via `AppState`; sharded per session
/// id, never a process-wide lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| Arc::clone(&s))
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether the user has a session other than `exclude` still registered.
    /// Detached-but-resumable sessions count: presence survives the grace
    /// window.
    pub fn user_has_other_sessions(&self, user_id: &str, exclude: &str) -> bool {
        self.sessions.iter().any(|entry| {
            entry.user_id == user_id && entry.session_id != exclude
        })
    }

    /// Remove and return every session whose grace window has lapsed. The
    /// caller tears down router subscriptions for each.
    pub fn reap_expired(&self, now: Instant) -> Vec<Arc<Session>> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.session_id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|session_id| {
                self.sessions.remove(&session_id).map(|(_, session)| {
                    session.mark_closed();
                    session
                })
            })
            .collect()
    }

    /// Graceful shutdown: tell every live session to reconnect (resumable,
    /// from the client's point of view a fresh process may still honor it),
    /// then close.
    pub fn shutdown_all(&self) {
        for entry in self.sessions.iter() {
            entry.send_control(events::reconnect(true));
            entry.mark_closed();
        }
    }
}
