use std::sync::Arc;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::config::GatewayConfig;
use crate::gateway::dispatcher::Dispatcher;
use crate::gateway::registry::SessionRegistry;
use crate::gateway::router::SubjectRouter;
use crate::models::event::DomainEvent;
use crate::models::presence::Presence;
use crate::permissions::cache::PermissionCache;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub registry: Arc<SessionRegistry>,
    pub router: Arc<SubjectRouter>,
    pub perm_cache: Arc<PermissionCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub presences: Arc<DashMap<String, Presence>>,
    pub gateway: GatewayConfig,
    events: mpsc::UnboundedSender<DomainEvent>,
}

impl AppState {
    /// Build the shared state plus the receiving end of the publish queue,
    /// which the caller hands to the dispatcher task.
    pub fn new(
        db: SqlitePool,
        gateway: GatewayConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new());
        let router = Arc::new(SubjectRouter::new());
        let perm_cache = Arc::new(PermissionCache::new());
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            Arc::clone(&registry),
            Arc::clone(&router),
            Arc::clone(&perm_cache),
        ));
        (
            Self {
                db,
                registry,
                router,
                perm_cache,
                dispatcher,
                presences: Arc::new(DashMap::new()),
                gateway,
                events,
            },
            rx,
        )
    }

    /// The `Broadcast(event)` entry point: any internal service can call this
    /// to trigger fanout. Fire-and-forget; delivery is at-least-once within
    /// the process.
    pub fn publish(&self, event: DomainEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("publish after dispatcher shutdown");
        }
    }
}
