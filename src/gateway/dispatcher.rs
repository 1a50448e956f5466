use std::collections::HashSet;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::db;
use crate::error::AppError;
use crate::models::event::{event_type, DomainEvent, Subject};
use crate::permissions::cache::PermissionCache;
use crate::permissions::{query, Permissions};

use super::registry::SessionRegistry;
use super::router::SubjectRouter;
use super::session::Session;

/// Fans published domain events out to interested sessions.
///
/// Runs as a single task consuming the publish queue. For every event it
/// first applies routing side effects (membership, role, override and channel
/// lifecycle changes keep subscriptions and the permission cache current),
/// then resolves the subject's candidate sessions and delivers, dropping
/// channel-scoped events for viewers without `VIEW_CHANNEL`.
pub struct Dispatcher {
    db: SqlitePool,
    registry: Arc<SessionRegistry>,
    router: Arc<SubjectRouter>,
    cache: Arc<PermissionCache>,
}

impl Dispatcher {
    pub fn new(
        db: SqlitePool,
        registry: Arc<SessionRegistry>,
        router: Arc<SubjectRouter>,
        cache: Arc<PermissionCache>,
    ) -> Self {
        Self {
            db,
            registry,
            router,
            cache,
        }
    }

    /// Consume the publish queue until every sender is gone.
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<DomainEvent>) {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = self.dispatch(event).await {
                    tracing::error!("dispatch failed: {e:?}");
                }
            }
        });
    }

    pub async fn dispatch(&self, event: DomainEvent) -> Result<(), AppError> {
        self.sync_routing(&event).await?;
        self.fan_out(&event).await
    }

    /// Build the full subscription set for a freshly identified session:
    /// its user subject, each guild subject, and every visible channel.
    /// Returns the guild ids for the ready snapshot.
    pub async fn register_subscriptions(
        &self,
        session: &Arc<Session>,
    ) -> Result<Vec<String>, AppError> {
        self.registry.insert(Arc::clone(session));
        self.router.subscribe(
            &session.session_id,
            Subject::User(session.user_id.clone()),
        );

        let guild_ids = db::guilds::list_guild_ids_for_user(&self.db, &session.user_id).await?;
        for guild_id in &guild_ids {
            self.router
                .subscribe(&session.session_id, Subject::Guild(guild_id.clone()));
            self.sync_session_channels(&session.session_id, &session.user_id, guild_id)
                .await?;
        }
        Ok(guild_ids)
    }

    async fn sync_session_channels(
        &self,
        session_id: &str,
        user_id: &str,
        guild_id: &str,
    ) -> Result<(), AppError> {
        let all = db::channels::list_channel_ids(&self.db, guild_id).await?;
        let visible: HashSet<String> =
            query::visible_channel_ids(&self.db, &self.cache, user_id, guild_id)
                .await?
                .into_iter()
                .collect();
        self.router.sync_channels(session_id, &all, &visible);
        Ok(())
    }

    /// Re-derive channel subjects for every session belonging to `user_id`
    /// that is subscribed to `guild_id`.
    async fn resync_user(&self, guild_id: &str, user_id: &str) -> Result<(), AppError> {
        self.cache.invalidate_user(user_id);
        let subject = Subject::Guild(guild_id.to_string());
        for session_id in self.router.resolve(&subject) {
            let Some(session) = self.registry.get(&session_id) else {
                continue;
            };
            if session.user_id == user_id {
                self.sync_session_channels(&session_id, user_id, guild_id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn resync_users(&self, guild_id: &str, user_ids: &[String]) -> Result<(), AppError> {
        for user_id in user_ids {
            self.resync_user(guild_id, user_id).await?;
        }
        Ok(())
    }

    /// Keep subscriptions and cached bitfields consistent with the change the
    /// event describes. Applied before fanout, so e.g. a kicked member never
    /// sees events past their own removal.
    async fn sync_routing(&self, event: &DomainEvent) -> Result<(), AppError> {
        match (event.event_type.as_str(), &event.guild_id) {
            (event_type::MEMBER_JOIN, Some(guild_id)) => {
                let Some(user_id) = &event.user_id else {
                    return Ok(());
                };
                for entry_session in self.sessions_of_user(user_id) {
                    self.router.subscribe(
                        &entry_session.session_id,
                        Subject::Guild(guild_id.clone()),
                    );
                    self.sync_session_channels(&entry_session.session_id, user_id, guild_id)
                        .await?;
                }
            }
            (event_type::MEMBER_LEAVE | event_type::MEMBER_BAN, Some(guild_id)) => {
                let Some(user_id) = &event.user_id else {
                    return Ok(());
                };
                self.cache.invalidate_user(user_id);
                let guild_channels = db::channels::list_channel_ids(&self.db, guild_id).await?;
                for entry_session in self.sessions_of_user(user_id) {
                    self.router
                        .remove_guild(&entry_session.session_id, guild_id, &guild_channels);
                }
            }
            (event_type::MEMBER_UPDATE, Some(guild_id)) => {
                // Role set or timeout changed.
                if let Some(user_id) = &event.user_id {
                    self.resync_user(guild_id, user_id).await?;
                }
            }
            (event_type::ROLE_UPDATE, Some(guild_id)) => {
                self.cache.invalidate_guild(guild_id);
                let affected = match event.payload.get("id").and_then(|v| v.as_str()) {
                    Some(role_id) => {
                        db::roles::user_ids_with_role(&self.db, guild_id, role_id).await?
                    }
                    None => Vec::new(),
                };
                if affected.is_empty() {
                    self.resync_guild(guild_id).await?;
                } else {
                    self.resync_users(guild_id, &affected).await?;
                }
            }
            (event_type::ROLE_DELETE | event_type::GUILD_UPDATE, Some(guild_id)) => {
                // Holder rows are already gone (or the @everyone base moved):
                // every member of the guild is potentially affected.
                self.cache.invalidate_guild(guild_id);
                self.resync_guild(guild_id).await?;
            }
            (event_type::CHANNEL_CREATE, Some(guild_id)) => {
                if let Some(channel_id) = &event.channel_id {
                    self.resync_channel(guild_id, channel_id).await?;
                }
            }
            (event_type::CHANNEL_DELETE, _) => {
                if let Some(channel_id) = &event.channel_id {
                    self.cache.invalidate_channel(channel_id);
                    self.router
                        .drop_subject(&Subject::Channel(channel_id.clone()));
                }
            }
            (event_type::CHANNEL_OVERRIDE_UPDATE, Some(guild_id)) => {
                if let Some(channel_id) = &event.channel_id {
                    self.cache.invalidate_channel(channel_id);
                    self.resync_channel(guild_id, channel_id).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn sessions_of_user(&self, user_id: &str) -> Vec<Arc<Session>> {
        self.router
            .resolve(&Subject::User(user_id.to_string()))
            .into_iter()
            .filter_map(|session_id| self.registry.get(&session_id))
            .collect()
    }

    /// Re-derive channel subjects for every session in the guild.
    async fn resync_guild(&self, guild_id: &str) -> Result<(), AppError> {
        let subject = Subject::Guild(guild_id.to_string());
        for session_id in self.router.resolve(&subject) {
            let Some(session) = self.registry.get(&session_id) else {
                continue;
            };
            self.sync_session_channels(&session_id, &session.user_id, guild_id)
                .await?;
        }
        Ok(())
    }

    /// Re-evaluate visibility of one channel for every guild subscriber.
    /// Override changes never trigger a full re-subscribe of the guild.
    async fn resync_channel(&self, guild_id: &str, channel_id: &str) -> Result<(), AppError> {
        let subject = Subject::Guild(guild_id.to_string());
        let channel_subject = Subject::Channel(channel_id.to_string());
        for session_id in self.router.resolve(&subject) {
            let Some(session) = self.registry.get(&session_id) else {
                continue;
            };
            let perms =
                query::resolve_channel(&self.db, &self.cache, &session.user_id, channel_id)
                    .await?;
            if perms.contains(Permissions::VIEW_CHANNEL) {
                self.router.subscribe(&session_id, channel_subject.clone());
            } else {
                self.router.unsubscribe(&session_id, &channel_subject);
            }
        }
        Ok(())
    }

    async fn fan_out(&self, event: &DomainEvent) -> Result<(), AppError> {
        let Some(subject) = event.subject() else {
            tracing::warn!(
                "dropping unroutable event {:?}: no guild, channel or user id",
                event.event_type
            );
            return Ok(());
        };

        let candidates = self.router.resolve(&subject);
        match &subject {
            Subject::Channel(channel_id) => {
                for session_id in candidates {
                    let Some(session) = self.registry.get(&session_id) else {
                        continue;
                    };
                    let perms = query::resolve_channel(
                        &self.db,
                        &self.cache,
                        &session.user_id,
                        channel_id,
                    )
                    .await?;
                    if perms.contains(Permissions::VIEW_CHANNEL) {
                        session.push_event(&event.event_type, &event.payload);
                    }
                }
            }
            // Guild- and user-scoped events are visible to every subscriber.
            Subject::Guild(_) | Subject::User(_) => {
                for session_id in candidates {
                    if let Some(session) = self.registry.get(&session_id) {
                        session.push_event(&event.event_type, &event.payload);
                    }
                }
            }
        }
        Ok(())
    }
}
