use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::user::User;
use crate::snowflake;

pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<User, AppError> {
    let row = sqlx::query_as::<_, (String, String, bool)>(
        "SELECT id, username, is_bot FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("unknown user".to_string()))?;

    Ok(User {
        id: row.0,
        username: row.1,
        is_bot: row.2,
    })
}

pub async fn create_user(pool: &SqlitePool, username: &str, is_bot: bool) -> Result<User, AppError> {
    let id = snowflake::generate();
    sqlx::query("INSERT INTO users (id, username, is_bot) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(username)
        .bind(is_bot)
        .execute(pool)
        .await?;

    get_user(pool, &id).await
}

pub async fn get_users(pool: &SqlitePool, user_ids: &[String]) -> Result<Vec<User>, AppError> {
    let mut users = Vec::with_capacity(user_ids.len());
    for id in user_ids {
        if let Some(row) = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT id, username, is_bot FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        {
            users.push(User {
                id: row.0,
                username: row.1,
                is_bot: row.2,
            });
        }
    }
    Ok(users)
}
