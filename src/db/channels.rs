use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::channel::ChannelRow;
use crate::snowflake;

pub async fn get_channel_row(pool: &SqlitePool, channel_id: &str) -> Result<ChannelRow, AppError> {
    let row = sqlx::query_as::<_, (String, String, String, String)>(
        "SELECT id, guild_id, name, kind FROM channels WHERE id = ?",
    )
    .bind(channel_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("unknown channel".to_string()))?;

    Ok(ChannelRow {
        id: row.0,
        guild_id: row.1,
        name: row.2,
        kind: row.3,
    })
}

pub async fn list_channel_ids(pool: &SqlitePool, guild_id: &str) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT id FROM channels WHERE guild_id = ? ORDER BY id",
    )
    .bind(guild_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn create_channel(
    pool: &SqlitePool,
    guild_id: &str,
    name: &str,
    kind: &str,
) -> Result<ChannelRow, AppError> {
    let id = snowflake::generate();
    sqlx::query("INSERT INTO channels (id, guild_id, name, kind) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(guild_id)
        .bind(name)
        .bind(kind)
        .execute(pool)
        .await?;

    get_channel_row(pool, &id).await
}

pub async fn delete_channel(pool: &SqlitePool, channel_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM channels WHERE id = ?")
        .bind(channel_id)
        .execute(pool)
        .await?;
    Ok(())
}
