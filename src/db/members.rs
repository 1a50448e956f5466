use sqlx::{Row, SqlitePool};

use crate::error::AppError;
use crate::models::member::MemberRow;

fn row_to_member(row: sqlx::sqlite::SqliteRow) -> MemberRow {
    MemberRow {
        user_id: row.get("user_id"),
        guild_id: row.get("guild_id"),
        nickname: row.get("nickname"),
        joined_at: row.get("joined_at"),
        timeout_until: row.get("timeout_until"),
    }
}

const SELECT_MEMBERS: &str =
    "SELECT user_id, guild_id, nickname, joined_at, timeout_until FROM members";

pub async fn get_member_row(
    pool: &SqlitePool,
    guild_id: &str,
    user_id: &str,
) -> Result<Option<MemberRow>, AppError> {
    let row = sqlx::query(&format!(
        "{SELECT_MEMBERS} WHERE guild_id = ? AND user_id = ?"
    ))
    .bind(guild_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_member))
}

pub async fn list_members(pool: &SqlitePool, guild_id: &str) -> Result<Vec<MemberRow>, AppError> {
    let rows = sqlx::query(&format!(
        "{SELECT_MEMBERS} WHERE guild_id = ? ORDER BY user_id"
    ))
    .bind(guild_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_member).collect())
}

pub async fn list_member_user_ids(
    pool: &SqlitePool,
    guild_id: &str,
) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT user_id FROM members WHERE guild_id = ? ORDER BY user_id",
    )
    .bind(guild_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn add_member(pool: &SqlitePool, guild_id: &str, user_id: &str) -> Result<(), AppError> {
    sqlx::query("INSERT OR IGNORE INTO members (guild_id, user_id) VALUES (?, ?)")
        .bind(guild_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn remove_member(
    pool: &SqlitePool,
    guild_id: &str,
    user_id: &str,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM member_roles WHERE guild_id = ? AND user_id = ?")
        .bind(guild_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM members WHERE guild_id = ? AND user_id = ?")
        .bind(guild_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_member_role_ids(
    pool: &SqlitePool,
    guild_id: &str,
    user_id: &str,
) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT role_id FROM member_roles WHERE guild_id = ? AND user_id = ?",
    )
    .bind(guild_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn add_role(
    pool: &SqlitePool,
    guild_id: &str,
    user_id: &str,
    role_id: &str,
) -> Result<(), AppError> {
    sqlx::query("INSERT OR IGNORE INTO member_roles (guild_id, user_id, role_id) VALUES (?, ?, ?)")
        .bind(guild_id)
        .bind(user_id)
        .bind(role_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn remove_role(
    pool: &SqlitePool,
    guild_id: &str,
    user_id: &str,
    role_id: &str,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM member_roles WHERE guild_id = ? AND user_id = ? AND role_id = ?")
        .bind(guild_id)
        .bind(user_id)
        .bind(role_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// `timeout_until` is RFC 3339; `None` lifts the timeout.
pub async fn set_timeout(
    pool: &SqlitePool,
    guild_id: &str,
    user_id: &str,
    timeout_until: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query("UPDATE members SET timeout_until = ? WHERE guild_id = ? AND user_id = ?")
        .bind(timeout_until)
        .bind(guild_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
