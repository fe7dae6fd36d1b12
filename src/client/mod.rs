//! Client side of a session: one reconnecting WebSocket link per session key.
//!
//! [`SessionLink::connect`] spawns a task that owns the socket, the reconnect timer and
//! the read model. The model is published through a `watch` channel; mutators apply
//! locally first and forward to the coordinator only while a socket is open.

/// Reconnect delay schedule.
pub mod backoff;
/// Read model of a link.
pub mod view;

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::sleep,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderName, HeaderValue},
        protocol::frame::coding::CloseCode,
    },
};
use tracing::{debug, info, warn};
use url::Url;

use crate::dto::{
    session::{GameState, Presence},
    ws::{ClientMessage, ServerMessage},
};

pub use self::backoff::{Backoff, BackoffConfig};
pub use self::view::LinkView;

/// Failures reported to the application; transport faults are retried instead.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The session key is empty.
    #[error("instance id is required")]
    MissingInstanceId,
    /// An access token is required but none was configured.
    #[error("access token is required")]
    MissingAccessToken,
    /// The endpoint is not an absolute URL.
    #[error("invalid endpoint `{url}`")]
    InvalidEndpoint {
        /// Endpoint as configured.
        url: String,
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },
    /// The endpoint parsed but cannot start a WebSocket handshake.
    #[error("cannot open a WebSocket link to `{url}`")]
    UnsupportedEndpoint {
        /// Endpoint as configured.
        url: String,
        /// Handshake request failure.
        #[source]
        source: tungstenite::Error,
    },
    /// A configured header name or value is not valid HTTP.
    #[error("invalid header `{0}`")]
    InvalidHeader(String),
    /// The link task stopped (shutdown was requested).
    #[error("session link is closed")]
    Closed,
}

/// Where and how a link connects.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Session endpoint, e.g. `ws://localhost:8080/ws`.
    pub endpoint: String,
    /// Session key sent as `instanceId`.
    pub instance_id: String,
    /// Credential sent as `accessToken` when present.
    pub access_token: Option<String>,
    /// Refuse to start without an access token.
    pub require_access_token: bool,
    /// Extra handshake headers, e.g. an identity header injected by a trusted proxy.
    pub headers: Vec<(String, String)>,
    /// Reconnect delays.
    pub backoff: BackoffConfig,
}

impl LinkConfig {
    /// Link to `instance_id` at `endpoint` with default backoff and no credentials.
    pub fn new(endpoint: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            instance_id: instance_id.into(),
            access_token: None,
            require_access_token: false,
            headers: Vec::new(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Send `token` as `accessToken`.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Add a handshake header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the backoff settings.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    fn validate(&self) -> Result<(), LinkError> {
        if self.instance_id.is_empty() {
            return Err(LinkError::MissingInstanceId);
        }
        let has_token = self
            .access_token
            .as_deref()
            .is_some_and(|token| !token.is_empty());
        if self.require_access_token && !has_token {
            return Err(LinkError::MissingAccessToken);
        }
        self.request().map(|_| ())
    }

    /// Handshake request carrying the query parameters and configured headers.
    fn request(&self) -> Result<Request, LinkError> {
        let mut url = Url::parse(&self.endpoint).map_err(|source| LinkError::InvalidEndpoint {
            url: self.endpoint.clone(),
            source,
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("instanceId", &self.instance_id);
            if let Some(token) = self.access_token.as_deref().filter(|token| !token.is_empty()) {
                query.append_pair("accessToken", token);
            }
        }

        let mut request = url.as_str().into_client_request().map_err(|source| {
            LinkError::UnsupportedEndpoint {
                url: self.endpoint.clone(),
                source,
            }
        })?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| LinkError::InvalidHeader(name.clone()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| LinkError::InvalidHeader(name.to_string()))?;
            request.headers_mut().insert(name, value);
        }
        Ok(request)
    }
}

#[derive(Debug)]
enum Command {
    Send(ClientMessage),
    Shutdown,
}

/// Cloneable handle of a reconnecting session link.
///
/// The link stops on [`SessionLink::shutdown`] or once every handle is dropped; either
/// closes the open socket and cancels a pending reconnect.
#[derive(Clone)]
pub struct SessionLink {
    commands: mpsc::UnboundedSender<Command>,
    view: Arc<watch::Sender<LinkView>>,
}

impl SessionLink {
    /// Validate `config` and start connecting in the background.
    ///
    /// Missing parameters are caller errors and never scheduled for retry.
    pub fn connect(config: LinkConfig) -> Result<Self, LinkError> {
        if let Err(err) = config.validate() {
            warn!(instance_id = %config.instance_id, error = %err, "not connecting session link");
            return Err(err);
        }

        let backoff = Backoff::new(config.backoff.clone());
        let (view_tx, _view_rx) = watch::channel(LinkView {
            backoff: backoff.current(),
            ..LinkView::default()
        });
        let view = Arc::new(view_tx);
        let (commands, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(run(config, backoff, view.clone(), command_rx));
        Ok(Self { commands, view })
    }

    /// Snapshot of the read model.
    pub fn view(&self) -> LinkView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every read model change.
    pub fn subscribe(&self) -> watch::Receiver<LinkView> {
        self.view.subscribe()
    }

    /// True while a socket is open.
    pub fn is_live(&self) -> bool {
        self.view.borrow().live
    }

    /// Replace this link's presence locally, then forward it when a socket is open.
    ///
    /// Changes made while offline are not replayed after reconnecting.
    pub fn set_presence(&self, presence: Presence) -> Result<(), LinkError> {
        self.view.send_modify(|view| {
            view.set_own_presence(presence.clone());
        });
        self.forward(ClientMessage::Presence { presence })
    }

    /// Replace the game-state locally, then forward it when a socket is open.
    pub fn set_game_state(&self, game_state: GameState) -> Result<(), LinkError> {
        self.view.send_modify(|view| view.game_state = game_state.clone());
        self.forward(ClientMessage::GameState { game_state })
    }

    /// Close the socket and cancel any pending reconnect.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// True once the link task stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn forward(&self, message: ClientMessage) -> Result<(), LinkError> {
        self.commands
            .send(Command::Send(message))
            .map_err(|_| LinkError::Closed)
    }
}

/// How one connected episode ended.
enum Episode {
    Closed,
    Shutdown,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run(
    config: LinkConfig,
    mut backoff: Backoff,
    view: Arc<watch::Sender<LinkView>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let instance_id = config.instance_id.clone();

    loop {
        let request = match config.request() {
            Ok(request) => request,
            Err(err) => {
                warn!(instance_id = %instance_id, error = %err, "cannot build handshake; stopping link");
                break;
            }
        };

        let connecting = connect_async(request);
        tokio::pin!(connecting);
        let outcome = loop {
            tokio::select! {
                outcome = &mut connecting => break Some(outcome),
                command = commands.recv() => match command {
                    Some(Command::Send(_)) => debug!(instance_id = %instance_id, "offline; change kept locally"),
                    None | Some(Command::Shutdown) => break None,
                },
            }
        };
        let Some(outcome) = outcome else {
            break;
        };

        match outcome {
            Ok((socket, _response)) => {
                backoff.reset();
                view.send_modify(|view| {
                    view.live = true;
                    view.backoff = backoff.current();
                });
                info!(instance_id = %instance_id, "session link open");

                let episode = drive(socket, &instance_id, &view, &mut commands).await;
                view.send_modify(|view| view.live = false);
                if let Episode::Shutdown = episode {
                    break;
                }
            }
            Err(err) => {
                warn!(instance_id = %instance_id, error = %err, "session link failed to open");
            }
        }

        // One retry per episode, whatever mix of error and close ended it.
        let nominal = backoff.next_delay();
        let delay = backoff.jittered(nominal);
        view.send_modify(|view| view.backoff = backoff.current());
        info!(
            instance_id = %instance_id,
            attempt = backoff.attempts(),
            ?nominal,
            ?delay,
            "scheduling reconnect"
        );

        let pause = sleep(delay);
        tokio::pin!(pause);
        let cancelled = loop {
            tokio::select! {
                _ = &mut pause => break false,
                command = commands.recv() => match command {
                    Some(Command::Send(_)) => debug!(instance_id = %instance_id, "offline; change kept locally"),
                    None | Some(Command::Shutdown) => break true,
                },
            }
        };
        if cancelled {
            break;
        }
    }

    view.send_modify(|view| view.live = false);
    info!(instance_id = %instance_id, "session link stopped");
}

async fn drive(
    socket: Socket,
    instance_id: &str,
    view: &watch::Sender<LinkView>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Episode {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json_str(text.as_str()) {
                    Ok(message) => {
                        view.send_if_modified(|view| view.apply(message));
                    }
                    Err(err) => warn!(instance_id, error = %err, "dropping malformed frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    match frame.as_ref().map(|frame| frame.code) {
                        Some(CloseCode::Normal) | Some(CloseCode::Away) => {
                            info!(instance_id, "session link closed")
                        }
                        code => warn!(instance_id, ?code, "session link closed uncleanly"),
                    }
                    return Episode::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(instance_id, error = %err, "session link error");
                    return Episode::Closed;
                }
                None => {
                    warn!(instance_id, "session link dropped without close frame");
                    return Episode::Closed;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    let payload = match serde_json::to_string(&message) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(instance_id, error = %err, "failed to serialize frame `{message:?}`");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(Message::Text(payload.into())).await {
                        warn!(instance_id, error = %err, "failed to send frame");
                        return Episode::Closed;
                    }
                }
                None | Some(Command::Shutdown) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Episode::Shutdown;
                }
            },
        }
    }
}
