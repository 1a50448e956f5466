use sqlx::SqlitePool;

use crate::error::AppError;
use crate::permissions::resolve::{ChannelOverride, OverrideTarget};
use crate::permissions::Permissions;

/// Row target types. `everyone` is the channel's default override pair and
/// carries an empty target id.
pub const TARGET_ROLE: &str = "role";
pub const TARGET_USER: &str = "user";
pub const TARGET_EVERYONE: &str = "everyone";

pub struct OverrideRows {
    pub everyone: Option<(Permissions, Permissions)>,
    pub overrides: Vec<ChannelOverride>,
}

pub async fn list_overrides(
    pool: &SqlitePool,
    channel_id: &str,
) -> Result<OverrideRows, AppError> {
    let rows = sqlx::query_as::<_, (String, String, i64, i64)>(
        "SELECT target_type, target_id, allow, deny FROM channel_overrides WHERE channel_id = ?",
    )
    .bind(channel_id)
    .fetch_all(pool)
    .await?;

    let mut everyone = None;
    let mut overrides = Vec::new();
    for (target_type, target_id, allow, deny) in rows {
        let allow = Permissions::from_db(allow);
        let deny = Permissions::from_db(deny);
        match target_type.as_str() {
            TARGET_EVERYONE => everyone = Some((allow, deny)),
            TARGET_ROLE => overrides.push(ChannelOverride {
                target: OverrideTarget::Role(target_id),
                allow,
                deny,
            }),
            TARGET_USER => overrides.push(ChannelOverride {
                target: OverrideTarget::User(target_id),
                allow,
                deny,
            }),
            other => {
                tracing::warn!("ignoring channel override with target type {other:?}");
            }
        }
    }

    Ok(OverrideRows { everyone, overrides })
}

pub async fn upsert_override(
    pool: &SqlitePool,
    channel_id: &str,
    target_type: &str,
    target_id: &str,
    allow: Permissions,
    deny: Permissions,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO channel_overrides (channel_id, target_type, target_id, allow, deny) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (channel_id, target_type, target_id) DO UPDATE SET allow = excluded.allow, deny = excluded.deny",
    )
    .bind(channel_id)
    .bind(target_type)
    .bind(target_id)
    .bind(allow.to_db())
    .bind(deny.to_db())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_override(
    pool: &SqlitePool,
    channel_id: &str,
    target_type: &str,
    target_id: &str,
) -> Result<(), AppError> {
    sqlx::query(
        "DELETE FROM channel_overrides WHERE channel_id = ? AND target_type = ? AND target_id = ?",
    )
    .bind(channel_id)
    .bind(target_type)
    .bind(target_id)
    .execute(pool)
    .await?;

    Ok(())
}
