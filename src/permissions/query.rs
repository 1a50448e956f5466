use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db;
use crate::error::AppError;

use super::cache::PermissionCache;
use super::resolve::{self, ChannelSnapshot, GuildSnapshot, MemberSnapshot, RoleSnapshot};
use super::Permissions;

pub async fn guild_snapshot(
    pool: &SqlitePool,
    guild_id: &str,
) -> Result<Option<GuildSnapshot>, AppError> {
    let guild = match db::guilds::get_guild_row(pool, guild_id).await {
        Ok(row) => row,
        Err(AppError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    let roles = db::roles::list_roles(pool, guild_id)
        .await?
        .into_iter()
        .map(|row| RoleSnapshot {
            id: row.id,
            position: row.position,
            allow: Permissions::from_db(row.allow),
            deny: Permissions::from_db(row.deny),
        })
        .collect();

    Ok(Some(GuildSnapshot {
        id: guild.id,
        owner_id: guild.owner_id,
        default_permissions: Permissions::from_db(guild.default_permissions),
        roles,
    }))
}

pub async fn channel_snapshot(
    pool: &SqlitePool,
    channel_id: &str,
) -> Result<Option<ChannelSnapshot>, AppError> {
    let channel = match db::channels::get_channel_row(pool, channel_id).await {
        Ok(row) => row,
        Err(AppError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    let rows = db::overrides::list_overrides(pool, channel_id).await?;

    Ok(Some(ChannelSnapshot {
        id: channel.id,
        guild_id: channel.guild_id,
        everyone: rows.everyone,
        overrides: rows.overrides,
    }))
}

pub async fn member_snapshot(
    pool: &SqlitePool,
    guild_id: &str,
    user_id: &str,
) -> Result<Option<MemberSnapshot>, AppError> {
    let Some(member) = db::members::get_member_row(pool, guild_id, user_id).await? else {
        return Ok(None);
    };

    let role_ids = db::members::get_member_role_ids(pool, guild_id, user_id)
        .await?
        .into_iter()
        .collect();

    let timeout_until = member
        .timeout_until
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(Some(MemberSnapshot {
        user_id: member.user_id,
        role_ids,
        timeout_until,
    }))
}

/// Effective permissions for a user in a channel, via the cache.
///
/// Fails CLOSED: an unknown channel, guild, or non-member resolves to
/// `Permissions::NONE`. Only genuine storage faults surface as errors.
pub async fn resolve_channel(
    pool: &SqlitePool,
    cache: &PermissionCache,
    user_id: &str,
    channel_id: &str,
) -> Result<Permissions, AppError> {
    if let Some(cached) = cache.get(user_id, channel_id) {
        return Ok(cached);
    }

    let Some(channel) = channel_snapshot(pool, channel_id).await? else {
        return Ok(Permissions::NONE);
    };
    let Some(guild) = guild_snapshot(pool, &channel.guild_id).await? else {
        return Ok(Permissions::NONE);
    };
    let Some(member) = member_snapshot(pool, &channel.guild_id, user_id).await? else {
        return Ok(Permissions::NONE);
    };

    let perms = resolve::resolve(&member, &guild, &channel, Utc::now());
    cache.insert(user_id, channel_id, &channel.guild_id, perms);
    Ok(perms)
}

pub async fn require_channel_permission(
    pool: &SqlitePool,
    cache: &PermissionCache,
    user_id: &str,
    channel_id: &str,
    perm: Permissions,
) -> Result<(), AppError> {
    let perms = resolve_channel(pool, cache, user_id, channel_id).await?;
    if !perms.contains(perm) {
        return Err(AppError::Forbidden("missing permission".to_string()));
    }
    Ok(())
}

pub async fn require_membership(
    pool: &SqlitePool,
    guild_id: &str,
    user_id: &str,
) -> Result<(), AppError> {
    if db::members::get_member_row(pool, guild_id, user_id)
        .await?
        .is_none()
    {
        return Err(AppError::Forbidden(
            "you are not a member of this guild".to_string(),
        ));
    }
    Ok(())
}

/// Channel ids in `guild_id` the user can currently see. Drives the
/// channel-subject half of a session's subscription set.
pub async fn visible_channel_ids(
    pool: &SqlitePool,
    cache: &PermissionCache,
    user_id: &str,
    guild_id: &str,
) -> Result<Vec<String>, AppError> {
    let mut visible = Vec::new();
    for channel_id in db::channels::list_channel_ids(pool, guild_id).await? {
        let perms = resolve_channel(pool, cache, user_id, &channel_id).await?;
        if perms.contains(Permissions::VIEW_CHANNEL) {
            visible.push(channel_id);
        }
    }
    Ok(visible)
}
