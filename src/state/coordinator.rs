//! Session coordinator: the single writer of one session's state.
//!
//! Every admission, inbound frame and close event for a session is a
//! [`SessionCommand`] processed one at a time by the coordinator task, so the roster,
//! host and game-state need no locking. The task bootstraps from durable storage
//! before it reads its mailbox; admissions that arrive meanwhile wait in the queue.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::extract::ws::Message;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    time::{MissedTickBehavior, interval, sleep},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::SessionConfig,
    dao::{
        keys,
        kv_store::{KvStore, SessionStorage, get_json, put_json},
    },
    dto::{
        query::SessionSummary,
        session::{Connection, GameState, Identity, Presence, Roster},
        ws::{ClientMessage, ServerMessage},
    },
    error::ServiceError,
    state::{
        content::{ContentFactory, ContentSync, SyncOutcome},
        session::{SessionPhase, SessionState},
        store_slot::StoreSlot,
    },
};

/// Outbound queue of one connection, drained by its writer task.
pub type Outbound = mpsc::UnboundedSender<Message>;

/// Work items processed by a coordinator.
#[derive(Debug)]
pub enum SessionCommand {
    /// Register a new link and reply with its connection id.
    Admit {
        /// Resolved identity of the caller.
        identity: Identity,
        /// Queue drained by the link's writer task.
        outbound: Outbound,
        /// Receives the new connection id.
        reply: oneshot::Sender<String>,
    },
    /// Frame received on an admitted link.
    Inbound {
        /// Sending connection.
        connection_id: String,
        /// Parsed frame.
        message: ClientMessage,
    },
    /// The link closed.
    Disconnect {
        /// Closed connection.
        connection_id: String,
    },
    /// Read-only view for introspection.
    Summary {
        /// Receives the summary.
        reply: oneshot::Sender<SessionSummary>,
    },
}

/// Cloneable address of a running coordinator.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    key: Arc<str>,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Session key served by this coordinator.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once the coordinator stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Admit a link; resolves once the connection is registered and announced.
    pub async fn admit(
        &self,
        identity: Identity,
        outbound: Outbound,
    ) -> Result<String, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Admit {
            identity,
            outbound,
            reply,
        })?;
        response.await.map_err(|_| self.unavailable())
    }

    /// Forward a frame received on an admitted link.
    pub fn inbound(&self, connection_id: &str, message: ClientMessage) -> Result<(), ServiceError> {
        self.send(SessionCommand::Inbound {
            connection_id: connection_id.to_owned(),
            message,
        })
    }

    /// Report that a link closed.
    pub fn disconnect(&self, connection_id: &str) -> Result<(), ServiceError> {
        self.send(SessionCommand::Disconnect {
            connection_id: connection_id.to_owned(),
        })
    }

    /// Host, campaign, roster and game-state as seen by the coordinator.
    pub async fn summary(&self) -> Result<SessionSummary, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Summary { reply })?;
        response.await.map_err(|_| self.unavailable())
    }

    fn send(&self, command: SessionCommand) -> Result<(), ServiceError> {
        self.tx.send(command).map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> ServiceError {
        ServiceError::SessionUnavailable(self.key.to_string())
    }
}

/// Spawn the coordinator task of `key` and return its address.
pub fn spawn(
    key: &str,
    store: StoreSlot,
    config: SessionConfig,
    content: &ContentFactory,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator {
        key: key.to_owned(),
        store,
        config,
        session: SessionState::new(),
        roster: Roster::new(),
        links: HashMap::new(),
        content: content(),
        snapshot_dirty: false,
        host_durable: false,
        game_state_pending: false,
    };
    tokio::spawn(coordinator.run(rx));
    SessionHandle {
        key: Arc::from(key),
        tx,
    }
}

struct Coordinator {
    key: String,
    store: StoreSlot,
    config: SessionConfig,
    session: SessionState,
    roster: Roster,
    links: HashMap<String, Outbound>,
    content: Box<dyn ContentSync>,
    snapshot_dirty: bool,
    /// The host in memory is also the host in storage.
    host_durable: bool,
    /// The in-memory game-state has not reached storage yet.
    game_state_pending: bool,
}

impl Coordinator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        self.bootstrap().await;

        let mut flush = interval(
            self.config
                .snapshot_flush_interval
                .max(Duration::from_millis(1)),
        );
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let unsynced = self.needs_store_sync();
            // An undurable host must not be forgotten by an idle stop.
            let idle = self.roster.is_empty() && !unsynced;
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = flush.tick(), if self.snapshot_dirty || unsynced => {
                    self.sync_with_store().await;
                    if self.snapshot_dirty {
                        self.flush_snapshot().await;
                    }
                }
                _ = sleep(self.config.idle_timeout), if idle => {
                    info!(session = %self.key, "session idle; stopping coordinator");
                    break;
                }
            }
        }

        // Commands that raced the shutdown are dropped; their senders observe a closed
        // reply channel and re-route to a fresh coordinator.
        rx.close();
        while rx.try_recv().is_ok() {}

        self.sync_with_store().await;
        if self.snapshot_dirty {
            self.flush_snapshot().await;
        }
    }

    async fn handle(&mut self, command: SessionCommand) {
        self.sync_with_store().await;
        match command {
            SessionCommand::Admit {
                identity,
                outbound,
                reply,
            } => {
                let connection_id = self.admit(identity, outbound).await;
                if reply.send(connection_id.clone()).is_err() {
                    // The socket went away while waiting for admission.
                    self.disconnect(&connection_id).await;
                }
            }
            SessionCommand::Inbound {
                connection_id,
                message,
            } => self.dispatch(&connection_id, message).await,
            SessionCommand::Disconnect { connection_id } => self.disconnect(&connection_id).await,
            SessionCommand::Summary { reply } => {
                let _ = reply.send(self.summary());
            }
        }
    }

    // ------ Bootstrap ------

    async fn bootstrap(&mut self) {
        if let Err(err) = self.session.begin_bootstrap() {
            error!(session = %self.key, error = %err, "unexpected bootstrap state");
            return;
        }

        match self.store.current().await {
            Some(store) => self.load(store).await,
            None => warn!(
                session = %self.key,
                "no durable store installed; session starts from defaults"
            ),
        }

        match self.session.finish_bootstrap() {
            Ok(phase) => info!(session = %self.key, ?phase, "session ready"),
            Err(err) => error!(session = %self.key, error = %err, "unexpected bootstrap state"),
        }
    }

    async fn load(&mut self, store: Arc<dyn KvStore>) {
        let local = SessionStorage::new(store.clone(), &self.key);

        let stale = match local.get_json::<Roster>(keys::local::CONNECTIONS).await {
            Ok(roster) => roster.unwrap_or_default(),
            Err(err) => {
                warn!(session = %self.key, error = %err, "failed to load roster; using empty roster");
                Roster::new()
            }
        };

        match local.get_json::<String>(keys::local::HOST).await {
            Ok(Some(host)) => match self.session.restore_host(host) {
                Ok(()) => self.host_durable = true,
                Err(err) => error!(session = %self.key, error = %err, "failed to restore host"),
            },
            Ok(None) => {}
            Err(err) => warn!(session = %self.key, error = %err, "failed to load host"),
        }

        if let Some(host) = self.session.host().map(str::to_owned) {
            self.derive_from_host(store.as_ref(), &host).await;
        }

        // No link survives a coordinator restart, so every stored entry is stale.
        if !stale.is_empty() {
            info!(
                session = %self.key,
                stale = stale.len(),
                "dropping connections left over from a previous run"
            );
            if let Err(err) = local.put_json(keys::local::CONNECTIONS, &self.roster).await {
                warn!(session = %self.key, error = %err, "failed to persist pruned roster");
            }
        }
    }

    /// Resolve campaign, content snapshot and game-state for a known host.
    async fn derive_from_host(&mut self, store: &dyn KvStore, host: &str) {
        let campaign_id = match resolve_campaign(store, host).await {
            Ok(campaign_id) => campaign_id,
            Err(err) => {
                warn!(session = %self.key, host, error = %err, "failed to resolve campaign");
                return;
            }
        };
        self.session.set_campaign(campaign_id.clone());

        // Content edited while storage was out of reach is newer than the stored copy.
        if !self.snapshot_dirty {
            match get_json::<Value>(store, &keys::snapshot(host, &campaign_id)).await {
                Ok(snapshot) => self.content.load(snapshot),
                Err(err) => {
                    warn!(session = %self.key, error = %err, "failed to load content snapshot")
                }
            }
        }

        let game_state_key = keys::game_state(host, &campaign_id);
        if self.game_state_pending {
            self.persist_game_state(store).await;
            return;
        }
        match get_json::<GameState>(store, &game_state_key).await {
            Ok(Some(game_state)) => self.session.game_state = game_state,
            Ok(None) => {
                if let Err(err) = put_json(store, &game_state_key, &self.session.game_state).await {
                    warn!(session = %self.key, error = %err, "failed to store default game-state");
                }
            }
            Err(err) => warn!(session = %self.key, error = %err, "failed to load game-state"),
        }
    }

    // ------ Admission ------

    async fn admit(&mut self, identity: Identity, outbound: Outbound) -> String {
        if self.session.phase() == SessionPhase::NoHost
            && self.session.assign_host(&identity.id).is_ok()
        {
            info!(session = %self.key, host = %identity.id, "host assigned");
            self.host_durable = false;
            self.sync_with_store().await;
        }

        let connection_id = Uuid::new_v4().to_string();
        send_to(
            &outbound,
            &ServerMessage::ConnectionId {
                connection_id: connection_id.clone(),
            },
        );
        send_to(
            &outbound,
            &ServerMessage::GameState {
                game_state: self.session.game_state.clone(),
            },
        );

        let is_host = self.session.is_host(&identity.id);
        info!(
            session = %self.key,
            connection_id = %connection_id,
            identity = %identity.id,
            is_host,
            "connection admitted"
        );
        self.links.insert(connection_id.clone(), outbound);
        self.roster.insert(
            connection_id.clone(),
            Connection {
                connection_id: connection_id.clone(),
                identity,
                is_host,
                presence: Presence::default(),
            },
        );

        self.broadcast_roster();
        self.persist_roster().await;
        connection_id
    }

    // ------ Storage reconciliation ------

    /// Host, campaign or game-state still has to reach durable storage.
    fn needs_store_sync(&self) -> bool {
        self.session.host().is_some()
            && (!self.host_durable
                || self.session.campaign_id().is_none()
                || self.game_state_pending)
    }

    /// Persist the host and derive the campaign once a store is reachable.
    ///
    /// Runs after an election and before every command, so a host elected while
    /// degraded (or while writes failed) becomes durable as soon as storage returns.
    async fn sync_with_store(&mut self) {
        if !self.needs_store_sync() {
            return;
        }
        let Some(store) = self.store.current().await else {
            debug!(session = %self.key, "no durable store; host and game-state kept in memory");
            return;
        };

        if !self.host_durable && !self.make_host_durable(store.clone()).await {
            return;
        }
        let Some(host) = self.session.host().map(str::to_owned) else {
            return;
        };
        if self.session.campaign_id().is_none() {
            let before = self.session.game_state.clone();
            self.derive_from_host(store.as_ref(), &host).await;
            if self.session.game_state != before {
                self.broadcast(
                    &ServerMessage::GameState {
                        game_state: self.session.game_state.clone(),
                    },
                    &[],
                );
            }
        } else if self.game_state_pending {
            self.persist_game_state(store.as_ref()).await;
        }
    }

    /// Write the elected host unless storage already names an earlier one.
    async fn make_host_durable(&mut self, store: Arc<dyn KvStore>) -> bool {
        let Some(host) = self.session.host().map(str::to_owned) else {
            return false;
        };
        let local = SessionStorage::new(store, &self.key);

        match local.get_json::<String>(keys::local::HOST).await {
            Ok(Some(stored)) if stored != host => {
                warn!(
                    session = %self.key,
                    elected = %host,
                    stored = %stored,
                    "storage already names a host; keeping it"
                );
                self.session.adopt_stored_host(stored);
                self.refresh_host_flags();
                self.host_durable = true;
                return true;
            }
            Ok(Some(_)) => {
                self.host_durable = true;
                return true;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(session = %self.key, error = %err, "failed to read stored host; will retry");
                return false;
            }
        }

        match local.put_json(keys::local::HOST, &host).await {
            Ok(()) => {
                info!(session = %self.key, host = %host, "host persisted");
                self.host_durable = true;
                true
            }
            Err(err) => {
                error!(session = %self.key, error = %err, "failed to persist host; will retry");
                false
            }
        }
    }

    /// Recompute `isHost` after the host changed and announce the roster.
    fn refresh_host_flags(&mut self) {
        for connection in self.roster.values_mut() {
            connection.is_host = self.session.is_host(&connection.identity.id);
        }
        self.broadcast_roster();
    }

    async fn persist_game_state(&mut self, store: &dyn KvStore) {
        let (Some(host), Some(campaign_id)) = (self.session.host(), self.session.campaign_id())
        else {
            self.game_state_pending = true;
            return;
        };
        let key = keys::game_state(host, campaign_id);
        match put_json(store, &key, &self.session.game_state).await {
            Ok(()) => self.game_state_pending = false,
            Err(err) => {
                error!(session = %self.key, error = %err, "failed to persist game-state; will retry");
                self.game_state_pending = true;
            }
        }
    }

    // ------ Messages ------

    async fn dispatch(&mut self, connection_id: &str, message: ClientMessage) {
        if !self.roster.contains_key(connection_id) {
            warn!(session = %self.key, connection_id, "dropping frame from unknown connection");
            return;
        }

        match message {
            ClientMessage::Presence { presence } => self.update_presence(connection_id, presence),
            ClientMessage::GameState { game_state } => {
                self.update_game_state(connection_id, game_state).await
            }
            ClientMessage::Update { updates } => self.apply_updates(connection_id, updates),
            ClientMessage::Recovery => self.send_recovery(connection_id),
            ClientMessage::Unknown => {
                debug!(session = %self.key, connection_id, "ignoring unknown message type")
            }
        }
    }

    /// Presence is relayed but never persisted per event.
    fn update_presence(&mut self, connection_id: &str, presence: Presence) {
        if let Some(connection) = self.roster.get_mut(connection_id) {
            connection.presence = presence.clone();
        }
        self.broadcast(
            &ServerMessage::Presence {
                connection_id: connection_id.to_owned(),
                presence,
            },
            &[connection_id],
        );
    }

    async fn update_game_state(&mut self, connection_id: &str, game_state: GameState) {
        self.session.game_state = game_state.clone();
        self.broadcast(&ServerMessage::GameState { game_state }, &[connection_id]);

        self.game_state_pending = true;
        let Some(store) = self.store.current().await else {
            warn!(session = %self.key, "no durable store; game-state kept in memory");
            return;
        };
        if self.session.campaign_id().is_none() {
            warn!(session = %self.key, "game-state has no campaign yet; kept in memory");
            return;
        }
        self.persist_game_state(store.as_ref()).await;
    }

    fn apply_updates(&mut self, connection_id: &str, updates: Value) {
        match self.content.apply(&updates) {
            Ok(SyncOutcome::Applied) => {
                self.broadcast(&ServerMessage::Update { updates }, &[connection_id]);
                self.snapshot_dirty = true;
            }
            Ok(SyncOutcome::Ignored) => {
                debug!(session = %self.key, connection_id, "update batch ignored")
            }
            Err(err) => {
                warn!(session = %self.key, connection_id, error = %err, "update rejected; sending recovery");
                self.send_recovery(connection_id);
            }
        }
    }

    fn send_recovery(&self, connection_id: &str) {
        let Some(snapshot) = self.content.snapshot() else {
            debug!(session = %self.key, connection_id, "no snapshot to recover from");
            return;
        };
        if let Some(outbound) = self.links.get(connection_id) {
            send_to(outbound, &ServerMessage::Recovery { snapshot });
        }
    }

    async fn flush_snapshot(&mut self) {
        let (Some(host), Some(campaign_id)) = (self.session.host(), self.session.campaign_id())
        else {
            self.snapshot_dirty = false;
            return;
        };
        let Some(snapshot) = self.content.snapshot() else {
            self.snapshot_dirty = false;
            return;
        };
        let key = keys::snapshot(host, campaign_id);
        let Some(store) = self.store.current().await else {
            warn!(session = %self.key, "no durable store; snapshot kept in memory");
            return;
        };
        match put_json(store.as_ref(), &key, &snapshot).await {
            Ok(()) => self.snapshot_dirty = false,
            Err(err) => warn!(session = %self.key, error = %err, "failed to persist snapshot"),
        }
    }

    // ------ Disconnection ------

    async fn disconnect(&mut self, connection_id: &str) {
        self.links.remove(connection_id);
        if self.roster.shift_remove(connection_id).is_none() {
            return;
        }
        info!(session = %self.key, connection_id, "connection closed");
        self.broadcast_roster();
        self.persist_roster().await;
    }

    // ------ Helpers ------

    fn broadcast_roster(&self) {
        self.broadcast(
            &ServerMessage::Connections {
                connections: self.roster.clone(),
            },
            &[],
        );
    }

    /// Send `message` to every link except `exclude`. Delivery faults stay per link.
    fn broadcast(&self, message: &ServerMessage, exclude: &[&str]) {
        let payload = match message.to_json_string() {
            Ok(payload) => payload,
            Err(err) => {
                error!(session = %self.key, error = %err, "failed to serialize broadcast");
                return;
            }
        };

        for (connection_id, outbound) in &self.links {
            if exclude.contains(&connection_id.as_str()) {
                continue;
            }
            if outbound.send(Message::Text(payload.clone().into())).is_err() {
                debug!(session = %self.key, connection_id = %connection_id, "skipping closed connection");
            }
        }
    }

    async fn persist_roster(&self) {
        let Some(store) = self.store.current().await else {
            debug!(session = %self.key, "no durable store; roster kept in memory");
            return;
        };
        let local = SessionStorage::new(store, &self.key);
        if let Err(err) = local.put_json(keys::local::CONNECTIONS, &self.roster).await {
            warn!(session = %self.key, error = %err, "failed to persist roster");
        }
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_key: self.key.clone(),
            host: self.session.host().map(str::to_owned),
            campaign_id: self.session.campaign_id().map(str::to_owned),
            connections: self.roster.clone(),
            game_state: self.session.game_state.clone(),
        }
    }
}

/// Read the selected campaign of `host`, allocating a new one on first use.
async fn resolve_campaign(
    store: &dyn KvStore,
    host: &str,
) -> Result<String, crate::dao::storage::StorageError> {
    if let Some(campaign_id) = get_json::<String>(store, &keys::selected_campaign(host)).await? {
        return Ok(campaign_id);
    }

    let campaign_id = Uuid::new_v4().to_string();
    put_json(store, &keys::campaigns(host), &[campaign_id.as_str()]).await?;
    put_json(store, &keys::selected_campaign(host), &campaign_id).await?;
    info!(host, campaign_id = %campaign_id, "allocated campaign");
    Ok(campaign_id)
}

/// Serialize and enqueue one frame; a closed queue only affects that connection.
fn send_to(outbound: &Outbound, message: &ServerMessage) {
    match message.to_json_string() {
        Ok(payload) => {
            if outbound.send(Message::Text(payload.into())).is_err() {
                debug!("dropping frame for closed connection");
            }
        }
        Err(err) => warn!(error = %err, "failed to serialize frame `{message:?}`"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::{BoxFuture, FutureExt};
    use serde_json::json;

    use super::*;
    use crate::{
        dao::{kv_store::memory::MemoryKvStore, storage::StorageResult},
        dto::session::{Cursor, GameSystem},
        state::content::{ContentSyncError, inert_content},
    };

    type Frames = mpsc::UnboundedReceiver<Message>;

    fn memory_slot() -> (Arc<MemoryKvStore>, StoreSlot) {
        let store = Arc::new(MemoryKvStore::new());
        let slot = StoreSlot::with_store(store.clone());
        (store, slot)
    }

    fn start(slot: StoreSlot) -> SessionHandle {
        spawn("abc", slot, SessionConfig::default(), &inert_content())
    }

    async fn join(handle: &SessionHandle, identity: &str) -> (String, Frames) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = handle
            .admit(Identity::with_id(identity), tx)
            .await
            .unwrap();
        (connection_id, rx)
    }

    /// Frames queued so far; call after a `summary()` round-trip to observe every
    /// effect of earlier commands.
    fn drain(rx: &mut Frames) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let Message::Text(text) = message {
                frames.push(ServerMessage::from_json_str(text.as_str()).unwrap());
            }
        }
        frames
    }

    fn roster_of(frame: &ServerMessage) -> &Roster {
        match frame {
            ServerMessage::Connections { connections } => connections,
            other => panic!("expected roster, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_connection_becomes_host_and_sees_itself() {
        let (store, slot) = memory_slot();
        let handle = start(slot);

        let (a, mut rx_a) = join(&handle, "u1").await;
        handle.summary().await.unwrap();

        let frames = drain(&mut rx_a);
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames[0],
            ServerMessage::ConnectionId {
                connection_id: a.clone()
            }
        );
        assert!(matches!(frames[1], ServerMessage::GameState { .. }));
        let roster = roster_of(&frames[2]);
        assert!(roster[&a].is_host);
        assert_eq!(roster[&a].presence, Presence::default());

        let host: Option<String> = SessionStorage::new(store, "abc")
            .get_json(keys::local::HOST)
            .await
            .unwrap();
        assert_eq!(host.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn later_identities_never_take_over_host() {
        let (_store, slot) = memory_slot();
        let handle = start(slot);

        let (a, _rx_a) = join(&handle, "u1").await;
        let (b, mut rx_b) = join(&handle, "u2").await;
        handle.disconnect(&a).unwrap();
        let (c, _rx_c) = join(&handle, "u2").await;

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.host.as_deref(), Some("u1"));
        assert!(!summary.connections[&b].is_host);
        assert!(!summary.connections[&c].is_host);

        let frames = drain(&mut rx_b);
        let roster = roster_of(&frames[2]);
        assert_eq!(roster.len(), 2);
        assert!(roster[&a].is_host);
        assert!(!roster[&b].is_host);
    }

    #[tokio::test]
    async fn same_identity_on_two_links_is_host_twice() {
        let (_store, slot) = memory_slot();
        let handle = start(slot);

        let (a, _rx_a) = join(&handle, "u1").await;
        let (b, _rx_b) = join(&handle, "u1").await;

        let summary = handle.summary().await.unwrap();
        assert_ne!(a, b);
        assert!(summary.connections[&a].is_host);
        assert!(summary.connections[&b].is_host);
    }

    #[tokio::test]
    async fn presence_is_relayed_to_others_only() {
        let (_store, slot) = memory_slot();
        let handle = start(slot);
        let (a, mut rx_a) = join(&handle, "u1").await;
        let (_b, mut rx_b) = join(&handle, "u2").await;
        handle.summary().await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let presence = Presence {
            page_id: "page:page".into(),
            cursor: Some(Cursor { x: 10.0, y: 20.0 }),
        };
        handle
            .inbound(
                &a,
                ClientMessage::Presence {
                    presence: presence.clone(),
                },
            )
            .unwrap();
        let summary = handle.summary().await.unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::Presence {
                connection_id: a.clone(),
                presence: presence.clone(),
            }]
        );
        assert_eq!(summary.connections[&a].presence, presence);
    }

    #[tokio::test]
    async fn game_state_is_relayed_and_survives_restart() {
        let (store, slot) = memory_slot();
        let handle = start(slot.clone());
        let (a, mut rx_a) = join(&handle, "u1").await;
        let (_b, mut rx_b) = join(&handle, "u2").await;
        handle.summary().await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let game_state = GameState {
            system: Some(GameSystem::Pathfinder),
            ..GameState::default()
        };
        handle
            .inbound(
                &a,
                ClientMessage::GameState {
                    game_state: game_state.clone(),
                },
            )
            .unwrap();
        let summary = handle.summary().await.unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::GameState {
                game_state: game_state.clone()
            }]
        );

        let campaign_id = summary.campaign_id.unwrap();
        let stored: Option<GameState> =
            get_json(store.as_ref(), &keys::game_state("u1", &campaign_id))
                .await
                .unwrap();
        assert_eq!(stored.as_ref(), Some(&game_state));

        // A fresh coordinator on the same storage restores host, campaign and state.
        let restarted = start(slot);
        let (_c, mut rx_c) = join(&restarted, "u2").await;
        let summary = restarted.summary().await.unwrap();
        assert_eq!(summary.host.as_deref(), Some("u1"));
        assert_eq!(summary.campaign_id.as_deref(), Some(campaign_id.as_str()));
        assert_eq!(drain(&mut rx_c)[1], ServerMessage::GameState { game_state });
    }

    #[tokio::test]
    async fn campaign_is_allocated_once_per_host() {
        let (store, slot) = memory_slot();
        let handle = start(slot);
        join(&handle, "u1").await;
        let summary = handle.summary().await.unwrap();
        let campaign_id = summary.campaign_id.unwrap();

        let campaigns: Option<Vec<String>> = get_json(store.as_ref(), &keys::campaigns("u1"))
            .await
            .unwrap();
        assert_eq!(campaigns, Some(vec![campaign_id.clone()]));
        let default_state: Option<GameState> =
            get_json(store.as_ref(), &keys::game_state("u1", &campaign_id))
                .await
                .unwrap();
        assert_eq!(default_state, Some(GameState::default()));

        // Another session hosted by the same identity lands on the same campaign.
        let other = spawn(
            "other",
            StoreSlot::with_store(store.clone()),
            SessionConfig::default(),
            &inert_content(),
        );
        join(&other, "u1").await;
        let other_summary = other.summary().await.unwrap();
        assert_eq!(other_summary.campaign_id, Some(campaign_id));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (store, slot) = memory_slot();
        let handle = start(slot);
        let (a, _rx_a) = join(&handle, "u1").await;
        let (b, mut rx_b) = join(&handle, "u2").await;
        handle.summary().await.unwrap();
        drain(&mut rx_b);

        handle.disconnect(&a).unwrap();
        handle.disconnect(&a).unwrap();
        let summary = handle.summary().await.unwrap();

        let frames = drain(&mut rx_b);
        assert_eq!(frames.len(), 1);
        let roster = roster_of(&frames[0]);
        assert_eq!(roster.keys().collect::<Vec<_>>(), vec![&b]);
        assert_eq!(summary.connections.len(), 1);

        let persisted: Option<Roster> = SessionStorage::new(store, "abc")
            .get_json(keys::local::CONNECTIONS)
            .await
            .unwrap();
        assert_eq!(persisted.unwrap().keys().collect::<Vec<_>>(), vec![&b]);
    }

    #[tokio::test]
    async fn frames_from_unknown_connections_are_dropped() {
        let (_store, slot) = memory_slot();
        let handle = start(slot);
        let (_a, mut rx_a) = join(&handle, "u1").await;
        handle.summary().await.unwrap();
        drain(&mut rx_a);

        handle
            .inbound(
                "ghost",
                ClientMessage::Presence {
                    presence: Presence::default(),
                },
            )
            .unwrap();
        let summary = handle.summary().await.unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(summary.connections.len(), 1);
    }

    #[tokio::test]
    async fn stale_roster_is_pruned_at_bootstrap() {
        let (store, slot) = memory_slot();
        let local = SessionStorage::new(store.clone(), "abc");
        let mut stale = Roster::new();
        stale.insert(
            "old".into(),
            Connection {
                connection_id: "old".into(),
                identity: Identity::with_id("u9"),
                is_host: false,
                presence: Presence::default(),
            },
        );
        local.put_json(keys::local::CONNECTIONS, &stale).await.unwrap();

        let handle = start(slot);
        let summary = handle.summary().await.unwrap();
        assert!(summary.connections.is_empty());

        let persisted: Option<Roster> = local.get_json(keys::local::CONNECTIONS).await.unwrap();
        assert_eq!(persisted, Some(Roster::new()));
    }

    #[tokio::test]
    async fn runs_on_defaults_without_a_store() {
        let handle = start(StoreSlot::empty());
        let (a, mut rx_a) = join(&handle, "u1").await;
        let summary = handle.summary().await.unwrap();

        assert_eq!(summary.host.as_deref(), Some("u1"));
        assert_eq!(summary.campaign_id, None);
        assert_eq!(summary.game_state, GameState::default());
        let frames = drain(&mut rx_a);
        assert!(roster_of(&frames[2])[&a].is_host);
    }

    struct FailingStore;

    impl KvStore for FailingStore {
        fn get(&self, _key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
            async { Err(down()) }.boxed()
        }

        fn put(&self, _key: &str, _value: String) -> BoxFuture<'static, StorageResult<()>> {
            async { Err(down()) }.boxed()
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            async { Err(down()) }.boxed()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            async { Err(down()) }.boxed()
        }
    }

    fn down() -> crate::dao::storage::StorageError {
        crate::dao::storage::StorageError::unavailable(
            "down".into(),
            std::io::Error::other("connection refused"),
        )
    }

    #[tokio::test]
    async fn storage_failures_do_not_block_admission() {
        let handle = start(StoreSlot::with_store(Arc::new(FailingStore)));
        let (a, mut rx_a) = join(&handle, "u1").await;
        let (b, _rx_b) = join(&handle, "u2").await;
        handle
            .inbound(
                &b,
                ClientMessage::GameState {
                    game_state: GameState::default(),
                },
            )
            .unwrap();

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.connections.len(), 2);
        assert_eq!(summary.host.as_deref(), Some("u1"));
        assert_eq!(
            drain(&mut rx_a)[0],
            ServerMessage::ConnectionId { connection_id: a }
        );
    }

    #[tokio::test]
    async fn host_elected_without_storage_becomes_durable_once_storage_returns() {
        let initial: [StoreSlot; 2] = [
            StoreSlot::empty(),
            StoreSlot::with_store(Arc::new(FailingStore)),
        ];
        for slot in initial {
            let handle = start(slot.clone());
            let (a, _rx_a) = join(&handle, "u1").await;
            let game_state = GameState {
                system: Some(GameSystem::Daggerheart),
                ..GameState::default()
            };
            handle
                .inbound(
                    &a,
                    ClientMessage::GameState {
                        game_state: game_state.clone(),
                    },
                )
                .unwrap();
            let summary = handle.summary().await.unwrap();
            assert_eq!(summary.host.as_deref(), Some("u1"));
            assert_eq!(summary.campaign_id, None);

            let store = Arc::new(MemoryKvStore::new());
            slot.install(store.clone()).await;
            handle.disconnect(&a).unwrap();
            let summary = handle.summary().await.unwrap();
            let campaign_id = summary.campaign_id.unwrap();

            let host: Option<String> = SessionStorage::new(store.clone(), "abc")
                .get_json(keys::local::HOST)
                .await
                .unwrap();
            assert_eq!(host.as_deref(), Some("u1"));
            let stored: Option<GameState> =
                get_json(store.as_ref(), &keys::game_state("u1", &campaign_id))
                    .await
                    .unwrap();
            assert_eq!(stored.as_ref(), Some(&game_state));

            let restarted = start(slot);
            let (b, mut rx_b) = join(&restarted, "u2").await;
            let summary = restarted.summary().await.unwrap();
            assert_eq!(summary.host.as_deref(), Some("u1"));
            assert!(!summary.connections[&b].is_host);
            assert_eq!(summary.campaign_id.as_deref(), Some(campaign_id.as_str()));
            assert_eq!(drain(&mut rx_b)[1], ServerMessage::GameState { game_state });
        }
    }

    #[tokio::test]
    async fn stored_host_outranks_an_election_made_while_degraded() {
        let store = Arc::new(MemoryKvStore::new());
        SessionStorage::new(store.clone(), "abc")
            .put_json(keys::local::HOST, "u0")
            .await
            .unwrap();

        let slot = StoreSlot::empty();
        let handle = start(slot.clone());
        let (a, mut rx_a) = join(&handle, "u1").await;
        assert_eq!(handle.summary().await.unwrap().host.as_deref(), Some("u1"));
        drain(&mut rx_a);

        slot.install(store.clone()).await;
        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.host.as_deref(), Some("u0"));
        assert!(!summary.connections[&a].is_host);
        assert!(summary.campaign_id.is_some());

        let frames = drain(&mut rx_a);
        assert!(!roster_of(&frames[0])[&a].is_host);
        let host: Option<String> = SessionStorage::new(store, "abc")
            .get_json(keys::local::HOST)
            .await
            .unwrap();
        assert_eq!(host.as_deref(), Some("u0"));
    }

    /// Applies array batches, rejects anything else, and snapshots the batch count.
    #[derive(Default)]
    struct CountingContent {
        applied: u64,
    }

    impl ContentSync for CountingContent {
        fn load(&mut self, snapshot: Option<Value>) {
            self.applied = snapshot
                .and_then(|value| value["applied"].as_u64())
                .unwrap_or_default();
        }

        fn apply(&mut self, updates: &Value) -> Result<SyncOutcome, ContentSyncError> {
            match updates.as_array() {
                Some(batch) if batch.is_empty() => Ok(SyncOutcome::Ignored),
                Some(_) => {
                    self.applied += 1;
                    Ok(SyncOutcome::Applied)
                }
                None => Err(ContentSyncError::Rejected("expected an array".into())),
            }
        }

        fn snapshot(&self) -> Option<Value> {
            Some(json!({ "applied": self.applied }))
        }
    }

    fn counting_content() -> ContentFactory {
        Arc::new(|| Box::new(CountingContent::default()))
    }

    #[tokio::test]
    async fn updates_are_relayed_and_rejections_trigger_recovery() {
        let (store, slot) = memory_slot();
        let config = SessionConfig {
            snapshot_flush_interval: Duration::from_millis(10),
            ..SessionConfig::default()
        };
        let handle = spawn("abc", slot, config, &counting_content());
        let (a, mut rx_a) = join(&handle, "u1").await;
        let (_b, mut rx_b) = join(&handle, "u2").await;
        let summary = handle.summary().await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let batch = json!([{ "added": { "shape:1": {} } }]);
        handle
            .inbound(&a, ClientMessage::Update { updates: batch.clone() })
            .unwrap();
        handle
            .inbound(&a, ClientMessage::Update { updates: json!([]) })
            .unwrap();
        handle
            .inbound(&a, ClientMessage::Update { updates: json!({ "bad": true }) })
            .unwrap();
        handle.summary().await.unwrap();

        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::Update { updates: batch }]
        );
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::Recovery {
                snapshot: json!({ "applied": 1 })
            }]
        );

        handle.inbound(&a, ClientMessage::Recovery).unwrap();
        handle.summary().await.unwrap();
        assert_eq!(drain(&mut rx_a).len(), 1);

        let key = keys::snapshot("u1", &summary.campaign_id.unwrap());
        let mut stored = None;
        for _ in 0..100 {
            stored = get_json::<Value>(store.as_ref(), &key).await.unwrap();
            if stored.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored, Some(json!({ "applied": 1 })));
    }

    #[tokio::test]
    async fn idle_coordinator_stops() {
        let config = SessionConfig {
            idle_timeout: Duration::from_millis(20),
            ..SessionConfig::default()
        };
        let (_store, slot) = memory_slot();
        let handle = spawn("abc", slot, config, &inert_content());
        let (a, _rx_a) = join(&handle, "u1").await;
        handle.disconnect(&a).unwrap();

        for _ in 0..100 {
            if handle.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_closed());
        assert!(matches!(
            handle.summary().await,
            Err(ServiceError::SessionUnavailable(key)) if key == "abc"
        ));
    }
}
