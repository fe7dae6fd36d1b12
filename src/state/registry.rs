use dashmap::DashMap;
use tracing::{debug, info};

use crate::{
    config::SessionConfig,
    dto::session::Identity,
    error::ServiceError,
    state::{
        content::ContentFactory,
        coordinator::{self, Outbound, SessionHandle},
        store_slot::StoreSlot,
    },
};

/// Addressing layer: maps a session key to its single live coordinator.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    store: StoreSlot,
    config: SessionConfig,
    content: ContentFactory,
}

impl SessionRegistry {
    /// Empty registry; coordinators share `store`, `config` and `content`.
    pub fn new(store: StoreSlot, config: SessionConfig, content: ContentFactory) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            config,
            content,
        }
    }

    /// Live handle for `key`, spawning a coordinator when none runs.
    pub fn handle(&self, key: &str) -> SessionHandle {
        let mut entry = self
            .sessions
            .entry(key.to_owned())
            .or_insert_with(|| self.spawn(key));
        if entry.is_closed() {
            debug!(session = key, "replacing stopped coordinator");
            *entry = self.spawn(key);
        }
        entry.clone()
    }

    /// Admit a link into `key`. Retries once when the coordinator stopped mid-request.
    pub async fn admit(
        &self,
        key: &str,
        identity: Identity,
        outbound: Outbound,
    ) -> Result<(SessionHandle, String), ServiceError> {
        let handle = self.handle(key);
        match handle.admit(identity.clone(), outbound.clone()).await {
            Ok(connection_id) => Ok((handle, connection_id)),
            Err(ServiceError::SessionUnavailable(_)) => {
                let handle = self.handle(key);
                let connection_id = handle.admit(identity, outbound).await?;
                Ok((handle, connection_id))
            }
            Err(err) => Err(err),
        }
    }

    /// Handle of a running coordinator, without spawning one.
    pub fn get(&self, key: &str) -> Option<SessionHandle> {
        self.sessions
            .get(key)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_closed())
    }

    /// Number of running coordinators; stopped entries are evicted on the way.
    pub fn live_count(&self) -> usize {
        self.sessions.retain(|_, handle| !handle.is_closed());
        self.sessions.len()
    }

    fn spawn(&self, key: &str) -> SessionHandle {
        info!(session = key, "starting session coordinator");
        coordinator::spawn(key, self.store.clone(), self.config, &self.content)
    }
}
