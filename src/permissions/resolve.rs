use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::Permissions;

/// Role data as the resolver consumes it.
///
/// Positions order a guild's roles: a HIGHER numeric `position` outranks a
/// lower one. Roles are applied in ascending position order so the
/// highest-position role lands last and wins overlapping bits. The guild
/// owner sits above every position; a member with no roles sits at the
/// `@everyone` base (position 0).
#[derive(Debug, Clone)]
pub struct RoleSnapshot {
    pub id: String,
    pub position: i64,
    pub allow: Permissions,
    pub deny: Permissions,
}

#[derive(Debug, Clone)]
pub struct GuildSnapshot {
    pub id: String,
    pub owner_id: String,
    pub default_permissions: Permissions,
    pub roles: Vec<RoleSnapshot>,
}

#[derive(Debug, Clone)]
pub struct MemberSnapshot {
    pub user_id: String,
    pub role_ids: HashSet<String>,
    pub timeout_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum OverrideTarget {
    Role(String),
    User(String),
}

#[derive(Debug, Clone)]
pub struct ChannelOverride {
    pub target: OverrideTarget,
    pub allow: Permissions,
    pub deny: Permissions,
}

#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub id: String,
    pub guild_id: String,
    /// The optional default (`@everyone`) allow/deny pair, applied before any
    /// role or user override.
    pub everyone: Option<(Permissions, Permissions)>,
    pub overrides: Vec<ChannelOverride>,
}

/// Compute a member's effective permissions in a channel.
///
/// Pure and total: all role/override data is pre-fetched by the caller, and
/// role or override references that resolve to nothing contribute nothing.
/// `now` is passed in so timeout expiry is deterministic under test.
pub fn resolve(
    member: &MemberSnapshot,
    guild: &GuildSnapshot,
    channel: &ChannelSnapshot,
    now: DateTime<Utc>,
) -> Permissions {
    // Owner short-circuits everything, including timeouts.
    if member.user_id == guild.owner_id {
        return Permissions::ALL;
    }

    let mut p = guild.default_permissions;

    let mut held: Vec<&RoleSnapshot> = guild
        .roles
        .iter()
        .filter(|role| member.role_ids.contains(&role.id))
        .collect();
    held.sort_by_key(|role| role.position);

    for role in &held {
        p = p.apply(role.allow, role.deny);
    }

    if p.contains(Permissions::ADMINISTRATOR) {
        return Permissions::ALL;
    }

    if let Some((allow, deny)) = channel.everyone {
        p = p.apply(allow, deny);
    }

    for role in &held {
        if let Some(ow) = channel.overrides.iter().find(
            |ow| matches!(&ow.target, OverrideTarget::Role(id) if *id == role.id),
        ) {
            p = p.apply(ow.allow, ow.deny);
        }
    }

    if let Some(ow) = channel.overrides.iter().find(
        |ow| matches!(&ow.target, OverrideTarget::User(id) if *id == member.user_id),
    ) {
        p = p.apply(ow.allow, ow.deny);
    }

    if member.timeout_until.is_some_and(|until| until > now) {
        p = p.without(Permissions::TIMEOUT_STRIPPED);
    }

    // A channel the member cannot see grants nothing at all.
    if !p.contains(Permissions::VIEW_CHANNEL) {
        return Permissions::NONE;
    }

    p
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn guild(default: Permissions, roles: Vec<RoleSnapshot>) -> GuildSnapshot {
        GuildSnapshot {
            id: "g1".into(),
            owner_id: "owner".into(),
            default_permissions: default,
            roles,
        }
    }

    fn role(id: &str, position: i64, allow: Permissions, deny: Permissions) -> RoleSnapshot {
        RoleSnapshot {
            id: id.into(),
            position,
            allow,
            deny,
        }
    }

    fn member(user_id: &str, role_ids: &[&str]) -> MemberSnapshot {
        MemberSnapshot {
            user_id: user_id.into(),
            role_ids: role_ids.iter().map(|id| id.to_string()).collect(),
            timeout_until: None,
        }
    }

    fn channel() -> ChannelSnapshot {
        ChannelSnapshot {
            id: "c1".into(),
            guild_id: "g1".into(),
            everyone: None,
            overrides: Vec::new(),
        }
    }

    #[test]
    fn owner_gets_all_bits_regardless_of_input() {
        let g = guild(
            Permissions::NONE,
            vec![role("r1", 1, Permissions::NONE, Permissions::ALL)],
        );
        let mut ch = channel();
        ch.overrides.push(ChannelOverride {
            target: OverrideTarget::User("owner".into()),
            allow: Permissions::NONE,
            deny: Permissions::ALL,
        });
        let mut m = member("owner", &["r1"]);
        m.timeout_until = Some(Utc::now() + Duration::hours(1));

        assert_eq!(resolve(&m, &g, &ch, Utc::now()), Permissions::ALL);
    }

    #[test]
    fn role_grant_on_empty_default() {
        // Scenario A: default 0, one role granting view+send.
        let g = guild(
            Permissions::NONE,
            vec![role(
                "r1",
                1,
                Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
                Permissions::NONE,
            )],
        );
        let p = resolve(&member("u1", &["r1"]), &g, &channel(), Utc::now());
        assert_eq!(p, Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES);
    }

    #[test]
    fn user_override_denies_role_grant() {
        // Scenario B: user-level deny beats the role allow.
        let g = guild(
            Permissions::NONE,
            vec![role(
                "r1",
                1,
                Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
                Permissions::NONE,
            )],
        );
        let mut ch = channel();
        ch.overrides.push(ChannelOverride {
            target: OverrideTarget::User("u1".into()),
            allow: Permissions::NONE,
            deny: Permissions::SEND_MESSAGES,
        });
        let p = resolve(&member("u1", &["r1"]), &g, &ch, Utc::now());
        assert_eq!(p, Permissions::VIEW_CHANNEL);
    }

    #[test]
    fn timeout_strips_action_bits_after_overrides() {
        // Scenario C: the timeout strip runs last, regardless of override
        // outcomes.
        let g = guild(
            Permissions::NONE,
            vec![role(
                "r1",
                1,
                Permissions::VIEW_CHANNEL
                    | Permissions::SEND_MESSAGES
                    | Permissions::CREATE_INVITES,
                Permissions::NONE,
            )],
        );
        let mut ch = channel();
        ch.overrides.push(ChannelOverride {
            target: OverrideTarget::User("u1".into()),
            allow: Permissions::CREATE_INVITES,
            deny: Permissions::SEND_MESSAGES,
        });
        let mut m = member("u1", &["r1"]);
        m.timeout_until = Some(Utc::now() + Duration::minutes(10));

        let p = resolve(&m, &g, &ch, Utc::now());
        assert_eq!(p, Permissions::VIEW_CHANNEL);
    }

    #[test]
    fn expired_timeout_has_no_effect() {
        let g = guild(
            Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
            vec![],
        );
        let mut m = member("u1", &[]);
        m.timeout_until = Some(Utc::now() - Duration::minutes(1));

        let p = resolve(&m, &g, &channel(), Utc::now());
        assert!(p.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn administrator_after_roles_ignores_channel_denies() {
        let g = guild(
            Permissions::NONE,
            vec![role("r1", 1, Permissions::ADMINISTRATOR, Permissions::NONE)],
        );
        let mut ch = channel();
        ch.everyone = Some((Permissions::NONE, Permissions::ALL));
        ch.overrides.push(ChannelOverride {
            target: OverrideTarget::User("u1".into()),
            allow: Permissions::NONE,
            deny: Permissions::ALL,
        });

        let p = resolve(&member("u1", &["r1"]), &g, &ch, Utc::now());
        assert_eq!(p, Permissions::ALL);
    }

    #[test]
    fn missing_view_channel_collapses_to_zero() {
        let g = guild(
            Permissions::SEND_MESSAGES | Permissions::CONNECT,
            vec![],
        );
        let p = resolve(&member("u1", &[]), &g, &channel(), Utc::now());
        assert_eq!(p, Permissions::NONE);
    }

    #[test]
    fn everyone_override_can_hide_then_role_override_restores() {
        let g = guild(
            Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
            vec![role("mods", 5, Permissions::NONE, Permissions::NONE)],
        );
        let mut ch = channel();
        ch.everyone = Some((Permissions::NONE, Permissions::VIEW_CHANNEL));
        ch.overrides.push(ChannelOverride {
            target: OverrideTarget::Role("mods".into()),
            allow: Permissions::VIEW_CHANNEL,
            deny: Permissions::NONE,
        });

        let outsider = resolve(&member("u1", &[]), &g, &ch, Utc::now());
        assert_eq!(outsider, Permissions::NONE);

        let insider = resolve(&member("u2", &["mods"]), &g, &ch, Utc::now());
        assert!(insider.contains(Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn role_priority_applies_highest_position_last() {
        // Pins the position convention: higher position = higher priority.
        let g = guild(
            Permissions::VIEW_CHANNEL,
            vec![
                role("junior", 1, Permissions::SEND_MESSAGES, Permissions::NONE),
                role("senior", 9, Permissions::NONE, Permissions::SEND_MESSAGES),
            ],
        );
        let p = resolve(&member("u1", &["junior", "senior"]), &g, &channel(), Utc::now());
        assert!(
            !p.contains(Permissions::SEND_MESSAGES),
            "the position-9 deny must be applied after the position-1 allow"
        );

        let g = guild(
            Permissions::VIEW_CHANNEL,
            vec![
                role("junior", 1, Permissions::NONE, Permissions::SEND_MESSAGES),
                role("senior", 9, Permissions::SEND_MESSAGES, Permissions::NONE),
            ],
        );
        let p = resolve(&member("u1", &["junior", "senior"]), &g, &channel(), Utc::now());
        assert!(p.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn unknown_role_ids_contribute_nothing() {
        let g = guild(Permissions::VIEW_CHANNEL, vec![]);
        let p = resolve(&member("u1", &["ghost-role"]), &g, &channel(), Utc::now());
        assert_eq!(p, Permissions::VIEW_CHANNEL);
    }
}
