/// Content synchronization seam.
pub mod content;
/// Per-session coordinator actor.
pub mod coordinator;
/// Coordinator lookup by session key.
pub mod registry;
/// Session phase, host and game-state.
pub mod session;
/// Swappable store reference.
pub mod store_slot;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::{
    config::AppConfig,
    dao::kv_store::KvStore,
    state::{
        content::{ContentFactory, inert_content},
        registry::SessionRegistry,
        store_slot::StoreSlot,
    },
};

/// Application state shared across handlers.
pub type SharedState = Arc<AppState>;

/// Central application state: configuration, the durable store and live sessions.
pub struct AppState {
    config: AppConfig,
    store: StoreSlot,
    degraded: watch::Sender<bool>,
    sessions: SessionRegistry,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::build(config, StoreSlot::empty(), true, inert_content())
    }

    /// Same as [`AppState::new`] with `store` already installed.
    pub fn with_store(config: AppConfig, store: Arc<dyn KvStore>) -> SharedState {
        Self::build(config, StoreSlot::with_store(store), false, inert_content())
    }

    /// Full constructor; `content` builds the content model of every new session.
    pub fn with_content(
        config: AppConfig,
        store: Option<Arc<dyn KvStore>>,
        content: ContentFactory,
    ) -> SharedState {
        let degraded = store.is_none();
        let slot = store.map(StoreSlot::with_store).unwrap_or_default();
        Self::build(config, slot, degraded, content)
    }

    fn build(
        config: AppConfig,
        store: StoreSlot,
        degraded: bool,
        content: ContentFactory,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(degraded);
        let sessions = SessionRegistry::new(store.clone(), config.session, content);
        Arc::new(Self {
            config,
            store,
            degraded: degraded_tx,
            sessions,
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn kv_store(&self) -> Option<Arc<dyn KvStore>> {
        self.store.current().await
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn set_kv_store(&self, store: Arc<dyn KvStore>) {
        self.store.install(store).await;
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_kv_store(&self) {
        self.store.clear().await;
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Session coordinators keyed by session key.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        let changed = self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
        if changed {
            info!(degraded = value, "degraded mode changed");
        }
    }
}
