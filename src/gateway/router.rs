use std::collections::HashSet;

use dashmap::DashMap;

use crate::models::event::Subject;

/// Subject → session indices for fanout candidate resolution.
///
/// Both directions are kept so a session teardown never scans the whole
/// subject space. Backed by sharded maps; mutation contends only on the
/// touched subject/session shard.
#[derive(Default)]
pub struct SubjectRouter {
    index: DashMap<Subject, HashSet<String>>,
    by_session: DashMap<String, HashSet<Subject>>,
}

impl SubjectRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: &str, subject: Subject) {
        self.index
            .entry(subject.clone())
            .or_default()
            .insert(session_id.to_string());
        self.by_session
            .entry(session_id.to_string())
            .or_default()
            .insert(subject);
    }

    pub fn unsubscribe(&self, session_id: &str, subject: &Subject) {
        if let Some(mut sessions) = self.index.get_mut(subject) {
            sessions.remove(session_id);
            if sessions.is_empty() {
                drop(sessions);
                self.index.remove_if(subject, |_, set| set.is_empty());
            }
        }
        if let Some(mut subjects) = self.by_session.get_mut(session_id) {
            subjects.remove(subject);
        }
    }

    /// Sessions currently subscribed to `subject`.
    pub fn resolve(&self, subject: &Subject) -> Vec<String> {
        self.index
            .get(subject)
            .map(|sessions| sessions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, session_id: &str, subject: &Subject) -> bool {
        self.by_session
            .get(session_id)
            .is_some_and(|subjects| subjects.contains(subject))
    }

    pub fn subjects_of(&self, session_id: &str) -> HashSet<Subject> {
        self.by_session
            .get(session_id)
            .map(|subjects| subjects.clone())
            .unwrap_or_default()
    }

    /// Tear down every subscription a session holds.
    pub fn remove_session(&self, session_id: &str) {
        if let Some((_, subjects)) = self.by_session.remove(session_id) {
            for subject in subjects {
                if let Some(mut sessions) = self.index.get_mut(&subject) {
                    sessions.remove(session_id);
                }
                self.index.remove_if(&subject, |_, set| set.is_empty());
            }
        }
    }

    /// Drop a subject outright (e.g. a deleted channel) from every session.
    pub fn drop_subject(&self, subject: &Subject) {
        if let Some((_, sessions)) = self.index.remove(subject) {
            for session_id in sessions {
                if let Some(mut subjects) = self.by_session.get_mut(&session_id) {
                    subjects.remove(subject);
                }
            }
        }
    }

    /// Reconcile one session's channel subjects within a guild: `all` is the
    /// guild's channel id set, `visible` the subset the user may see. Channel
    /// subjects outside `all` (other guilds) are untouched.
    pub fn sync_channels(&self, session_id: &str, all: &[String], visible: &HashSet<String>) {
        for channel_id in all {
            let subject = Subject::Channel(channel_id.clone());
            if visible.contains(channel_id) {
                self.subscribe(session_id, subject);
            } else {
                self.unsubscribe(session_id, &subject);
            }
        }
    }

    /// Remove the guild subject and every channel subject under it for one
    /// session (leave/kick/ban).
    pub fn remove_guild(&self, session_id: &str, guild_id: &str, guild_channels: &[String]) {
        self.unsubscribe(session_id, &Subject::Guild(guild_id.to_string()));
        for channel_id in guild_channels {
            self.unsubscribe(session_id, &Subject::Channel(channel_id.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_returns_subscribed_sessions() {
        let router = SubjectRouter::new();
        router.subscribe("s1", Subject::Guild("g1".into()));
        router.subscribe("s2", Subject::Guild("g1".into()));
        router.subscribe("s2", Subject::Channel("c1".into()));

        let mut sessions = router.resolve(&Subject::Guild("g1".into()));
        sessions.sort();
        assert_eq!(sessions, vec!["s1", "s2"]);
        assert_eq!(router.resolve(&Subject::Channel("c1".into())), vec!["s2"]);
        assert!(router.resolve(&Subject::Channel("void".into())).is_empty());
    }

    #[test]
    fn remove_session_clears_both_indices() {
        let router = SubjectRouter::new();
        router.subscribe("s1", Subject::Guild("g1".into()));
        router.subscribe("s1", Subject::Channel("c1".into()));
        router.remove_session("s1");

        assert!(router.resolve(&Subject::Guild("g1".into())).is_empty());
        assert!(router.subjects_of("s1").is_empty());
    }

    #[test]
    fn sync_channels_touches_only_the_given_guild() {
        let router = SubjectRouter::new();
        router.subscribe("s1", Subject::Channel("other-guild-chan".into()));
        router.subscribe("s1", Subject::Channel("c1".into()));

        let all = vec!["c1".to_string(), "c2".to_string()];
        let visible: HashSet<String> = ["c2".to_string()].into();
        router.sync_channels("s1", &all, &visible);

        assert!(!router.is_subscribed("s1", &Subject::Channel("c1".into())));
        assert!(router.is_subscribed("s1", &Subject::Channel("c2".into())));
        assert!(router.is_subscribed("s1", &Subject::Channel("other-guild-chan".into())));
    }

    #[test]
    fn drop_subject_removes_every_subscriber() {
        let router = SubjectRouter::new();
        router.subscribe("s1", Subject::Channel("c1".into()));
        router.subscribe("s2", Subject::Channel("c1".into()));
        router.drop_subject(&Subject::Channel("c1".into()));

        assert!(router.resolve(&Subject::Channel("c1".into())).is_empty());
        assert!(!router.is_subscribed("s1", &Subject::Channel("c1".into())));
    }
}
