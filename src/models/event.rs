use std::fmt;

use serde::{Deserialize, Serialize};

/// Routing key a domain event is published under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    Guild(String),
    Channel(String),
    User(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Guild(id) => write!(f, "guild:{id}"),
            Subject::Channel(id) => write!(f, "channel:{id}"),
            Subject::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Event types the gateway itself reacts to (routing side effects) or emits.
/// Collaborators are free to publish any other type; unknown types fan out
/// by subject with no side effects.
pub mod event_type {
    pub const MEMBER_JOIN: &str = "member.join";
    pub const MEMBER_LEAVE: &str = "member.leave";
    pub const MEMBER_BAN: &str = "member.ban";
    pub const MEMBER_UPDATE: &str = "member.update";
    pub const ROLE_UPDATE: &str = "role.update";
    pub const ROLE_DELETE: &str = "role.delete";
    pub const CHANNEL_CREATE: &str = "channel.create";
    pub const CHANNEL_DELETE: &str = "channel.delete";
    pub const CHANNEL_OVERRIDE_UPDATE: &str = "channel.override_update";
    pub const GUILD_UPDATE: &str = "guild.update";
    pub const PRESENCE_UPDATE: &str = "presence.update";
    pub const TYPING_START: &str = "typing.start";
    pub const VOICE_STATE_UPDATE: &str = "voice.state_update";
    pub const MEMBER_CHUNK: &str = "member.chunk";
    pub const READY: &str = "ready";
    pub const ERROR: &str = "error";
}

/// An event published into the gateway's fanout bus.
///
/// `guild_id`/`channel_id`/`user_id` position the event for routing and
/// permission checks; the per-connection sequence is assigned later, at each
/// session's writer.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub event_type: String,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    /// Channel-scoped event; delivery is gated on each viewer's
    /// `VIEW_CHANNEL`.
    pub fn channel(
        event_type: &str,
        guild_id: &str,
        channel_id: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            guild_id: Some(guild_id.to_string()),
            channel_id: Some(channel_id.to_string()),
            user_id: None,
            payload,
        }
    }

    /// Guild-scoped event; visible to every member, forwarded unconditionally.
    pub fn guild(event_type: &str, guild_id: &str, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            guild_id: Some(guild_id.to_string()),
            channel_id: None,
            user_id: None,
            payload,
        }
    }

    /// Event addressed to a single user's sessions.
    pub fn user(event_type: &str, user_id: &str, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            guild_id: None,
            channel_id: None,
            user_id: Some(user_id.to_string()),
            payload,
        }
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// The subject this event routes under. Channel wins over guild wins
    /// over user, mirroring the narrowest audience.
    pub fn subject(&self) -> Option<Subject> {
        if let Some(channel_id) = &self.channel_id {
            return Some(Subject::Channel(channel_id.clone()));
        }
        if let Some(guild_id) = &self.guild_id {
            return Some(Subject::Guild(guild_id.clone()));
        }
        self.user_id.clone().map(Subject::User)
    }
}
