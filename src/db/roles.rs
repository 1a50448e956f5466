use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::role::RoleRow;
use crate::permissions::Permissions;
use crate::snowflake;

pub async fn list_roles(pool: &SqlitePool, guild_id: &str) -> Result<Vec<RoleRow>, AppError> {
    let rows = sqlx::query_as::<_, (String, String, String, i64, i64, i64)>(
        "SELECT id, guild_id, name, position, allow, deny FROM roles WHERE guild_id = ? ORDER BY position",
    )
    .bind(guild_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| RoleRow {
            id: row.0,
            guild_id: row.1,
            name: row.2,
            position: row.3,
            allow: row.4,
            deny: row.5,
        })
        .collect())
}

pub async fn create_role(
    pool: &SqlitePool,
    guild_id: &str,
    name: &str,
    position: i64,
    allow: Permissions,
    deny: Permissions,
) -> Result<String, AppError> {
    let id = snowflake::generate();
    sqlx::query(
        "INSERT INTO roles (id, guild_id, name, position, allow, deny) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(guild_id)
    .bind(name)
    .bind(position)
    .bind(allow.to_db())
    .bind(deny.to_db())
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn update_role_permissions(
    pool: &SqlitePool,
    role_id: &str,
    allow: Permissions,
    deny: Permissions,
) -> Result<(), AppError> {
    sqlx::query("UPDATE roles SET allow = ?, deny = ? WHERE id = ?")
        .bind(allow.to_db())
        .bind(deny.to_db())
        .bind(role_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_role(pool: &SqlitePool, role_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM member_roles WHERE role_id = ?")
        .bind(role_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(role_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Users currently holding a role. Drives the targeted re-subscribe on role
/// changes.
pub async fn user_ids_with_role(
    pool: &SqlitePool,
    guild_id: &str,
    role_id: &str,
) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT user_id FROM member_roles WHERE guild_id = ? AND role_id = ?",
    )
    .bind(guild_id)
    .bind(role_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}
