#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use adventureboard_back::{
    config::AppConfig,
    dao::kv_store::{KvStore, memory::MemoryKvStore},
    dto::ws::ServerMessage,
    routes,
    state::{AppState, SharedState},
};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const IDENTITY_HEADER: &str = "x-session-identity";

/// Running server bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: SharedState,
    pub store: Arc<MemoryKvStore>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(AppConfig::default()).await
    }

    pub async fn start_with(config: AppConfig) -> Self {
        let store = Arc::new(MemoryKvStore::new());
        let state = AppState::with_store(config, store.clone() as Arc<dyn KvStore>);
        let app = routes::router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        Self { addr, state, store }
    }

    pub fn ws_endpoint(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Open a raw WebSocket link as `identity`.
    pub async fn join(&self, instance_id: &str, identity: &str) -> Client {
        let url = format!("{}?instanceId={instance_id}", self.ws_endpoint());
        let mut request = url.into_client_request().unwrap();
        request.headers_mut().insert(
            IDENTITY_HEADER,
            HeaderValue::from_str(&format!(r#"{{"id":"{identity}","username":"{identity}"}}"#))
                .unwrap(),
        );
        let (client, _) = connect_async(request).await.unwrap();
        client
    }

    /// Send a raw HTTP/1.1 GET and return the status code.
    pub async fn raw_get(&self, path_and_query: &str, headers: &[(&str, &str)]) -> u16 {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let mut request = format!("GET {path_and_query} HTTP/1.1\r\nHost: {}\r\n", self.addr);
        for (name, value) in headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        if !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("connection"))
        {
            request.push_str("Connection: close\r\n");
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        let mut buffer = [0u8; 1024];
        loop {
            let read = stream.read(&mut buffer).await.unwrap();
            response.extend_from_slice(&buffer[..read]);
            if read == 0 || response.windows(4).any(|window| window == b"\r\n\r\n") {
                break;
            }
        }
        let head = String::from_utf8_lossy(&response);
        head.split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap()
    }
}

/// Next coordinator frame, failing the test after two seconds.
pub async fn next_frame(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("link closed")
            .expect("link error");
        if let Message::Text(text) = frame {
            return ServerMessage::from_json_str(text.as_str()).unwrap();
        }
    }
}

/// Assert nothing arrives within `wait`.
pub async fn assert_silent(client: &mut Client, wait: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(wait, client.next()).await {
        panic!("unexpected frame: {text}");
    }
}

pub async fn send_json(client: &mut Client, value: serde_json::Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
