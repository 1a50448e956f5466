pub mod channels;
pub mod guilds;
pub mod members;
pub mod overrides;
pub mod roles;
pub mod users;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    // An in-memory database exists per connection, so it must not be pooled.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// The collaborator data this process reads: guilds, channels, roles,
/// memberships, overrides, and auth tokens. The CRUD services own writes in
/// production; the gateway only needs the shapes below.
async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            is_bot INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        "CREATE TABLE IF NOT EXISTS user_tokens (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            expires_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS bot_tokens (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE
        )",
        "CREATE TABLE IF NOT EXISTS guilds (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            owner_id TEXT NOT NULL REFERENCES users(id),
            default_permissions INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY,
            guild_id TEXT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'text'
        )",
        "CREATE TABLE IF NOT EXISTS roles (
            id TEXT PRIMARY KEY,
            guild_id TEXT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            allow INTEGER NOT NULL DEFAULT 0,
            deny INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS members (
            guild_id TEXT NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            nickname TEXT,
            joined_at TEXT NOT NULL DEFAULT (datetime('now')),
            timeout_until TEXT,
            PRIMARY KEY (guild_id, user_id)
        )",
        "CREATE TABLE IF NOT EXISTS member_roles (
            guild_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            PRIMARY KEY (guild_id, user_id, role_id)
        )",
        "CREATE TABLE IF NOT EXISTS channel_overrides (
            channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            target_type TEXT NOT NULL,
            target_id TEXT NOT NULL,
            allow INTEGER NOT NULL DEFAULT 0,
            deny INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (channel_id, target_type, target_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_members_user ON members(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_channels_guild ON channels(guild_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
