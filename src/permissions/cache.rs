use dashmap::DashMap;

use super::Permissions;

#[derive(Debug, Clone)]
struct CachedEntry {
    guild_id: String,
    perms: Permissions,
}

/// Resolved-bitfield cache keyed by (user, channel).
///
/// The dispatcher consults this on every channel-scoped fanout; entries are
/// dropped whenever the inputs that produced them change (role, override,
/// membership, timeout). Sharded internally, so invalidation never takes a
/// process-wide lock.
#[derive(Default)]
pub struct PermissionCache {
    entries: DashMap<(String, String), CachedEntry>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str, channel_id: &str) -> Option<Permissions> {
        self.entries
            .get(&(user_id.to_string(), channel_id.to_string()))
            .map(|entry| entry.perms)
    }

    pub fn insert(&self, user_id: &str, channel_id: &str, guild_id: &str, perms: Permissions) {
        self.entries.insert(
            (user_id.to_string(), channel_id.to_string()),
            CachedEntry {
                guild_id: guild_id.to_string(),
                perms,
            },
        );
    }

    pub fn invalidate_user(&self, user_id: &str) {
        self.entries.retain(|(user, _), _| user != user_id);
    }

    pub fn invalidate_channel(&self, channel_id: &str) {
        self.entries.retain(|(_, channel), _| channel != channel_id);
    }

    pub fn invalidate_guild(&self, guild_id: &str) {
        self.entries.retain(|_, entry| entry.guild_id != guild_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_inserted_value() {
        let cache = PermissionCache::new();
        cache.insert("u1", "c1", "g1", Permissions::VIEW_CHANNEL);
        assert_eq!(cache.get("u1", "c1"), Some(Permissions::VIEW_CHANNEL));
        assert_eq!(cache.get("u1", "c2"), None);
    }

    #[test]
    fn invalidation_scopes_are_independent() {
        let cache = PermissionCache::new();
        cache.insert("u1", "c1", "g1", Permissions::VIEW_CHANNEL);
        cache.insert("u1", "c2", "g2", Permissions::VIEW_CHANNEL);
        cache.insert("u2", "c1", "g1", Permissions::VIEW_CHANNEL);

        cache.invalidate_user("u1");
        assert_eq!(cache.get("u1", "c1"), None);
        assert_eq!(cache.get("u1", "c2"), None);
        assert!(cache.get("u2", "c1").is_some());

        cache.insert("u1", "c1", "g1", Permissions::VIEW_CHANNEL);
        cache.invalidate_channel("c1");
        assert_eq!(cache.get("u1", "c1"), None);
        assert_eq!(cache.get("u2", "c1"), None);

        cache.insert("u1", "c1", "g1", Permissions::VIEW_CHANNEL);
        cache.insert("u1", "c2", "g2", Permissions::VIEW_CHANNEL);
        cache.invalidate_guild("g1");
        assert_eq!(cache.get("u1", "c1"), None);
        assert!(cache.get("u1", "c2").is_some());
    }
}
