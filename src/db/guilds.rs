use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::guild::GuildRow;
use crate::permissions::Permissions;
use crate::snowflake;

pub async fn get_guild_row(pool: &SqlitePool, guild_id: &str) -> Result<GuildRow, AppError> {
    let row = sqlx::query_as::<_, (String, String, String, i64)>(
        "SELECT id, name, owner_id, default_permissions FROM guilds WHERE id = ?",
    )
    .bind(guild_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("unknown guild".to_string()))?;

    Ok(GuildRow {
        id: row.0,
        name: row.1,
        owner_id: row.2,
        default_permissions: row.3,
    })
}

pub async fn create_guild(
    pool: &SqlitePool,
    name: &str,
    owner_id: &str,
    default_permissions: Permissions,
) -> Result<GuildRow, AppError> {
    let id = snowflake::generate();
    sqlx::query("INSERT INTO guilds (id, name, owner_id, default_permissions) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(owner_id)
        .bind(default_permissions.to_db())
        .execute(pool)
        .await?;

    // The owner is always a member of their own guild.
    sqlx::query("INSERT INTO members (guild_id, user_id) VALUES (?, ?)")
        .bind(&id)
        .bind(owner_id)
        .execute(pool)
        .await?;

    get_guild_row(pool, &id).await
}

pub async fn set_default_permissions(
    pool: &SqlitePool,
    guild_id: &str,
    default_permissions: Permissions,
) -> Result<(), AppError> {
    sqlx::query("UPDATE guilds SET default_permissions = ? WHERE id = ?")
        .bind(default_permissions.to_db())
        .bind(guild_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_guild_ids_for_user(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT guild_id FROM members WHERE user_id = ? ORDER BY guild_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}
