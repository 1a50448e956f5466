use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

/// Identity resolved from an IDENTIFY token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub is_bot: bool,
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolve a gateway token of the form `"Bearer xxx"` or `"Bot xxx"`.
/// Anything else, an unknown hash, or an expired bearer token yields `None`.
pub async fn resolve_token(pool: &SqlitePool, token: &str) -> Option<AuthUser> {
    if let Some(raw) = token.strip_prefix("Bot ") {
        let token_hash = hash_token(raw);
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT user_id FROM bot_tokens WHERE token_hash = ?",
        )
        .bind(&token_hash)
        .fetch_optional(pool)
        .await
        .ok()??;
        return Some(AuthUser {
            user_id: row.0,
            is_bot: true,
        });
    }

    if let Some(raw) = token.strip_prefix("Bearer ") {
        let token_hash = hash_token(raw);
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT user_id, expires_at FROM user_tokens WHERE token_hash = ?",
        )
        .bind(&token_hash)
        .fetch_optional(pool)
        .await
        .ok()??;

        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        if row.1 < now {
            return None;
        }
        return Some(AuthUser {
            user_id: row.0,
            is_bot: false,
        });
    }

    None
}

/// Generate a random token string (the raw secret handed to the client).
pub fn generate_token() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let random: u64 = rand::random();
    format!("{ts:x}.{random:x}")
}

pub fn create_token_hash(token: &str) -> String {
    hash_token(token)
}

/// Store a bearer token for `user_id`. `expires_at` uses the same
/// `%Y-%m-%dT%H:%M:%S` UTC format the expiry check compares against.
pub async fn insert_user_token(
    pool: &SqlitePool,
    user_id: &str,
    token: &str,
    expires_at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO user_tokens (token_hash, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(create_token_hash(token))
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_bot_token(
    pool: &SqlitePool,
    user_id: &str,
    token: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO bot_tokens (token_hash, user_id) VALUES (?, ?)")
        .bind(create_token_hash(token))
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
