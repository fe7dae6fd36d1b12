//! Adventure Board backend entrypoint wiring configuration, storage, and the HTTP/WebSocket surface.

use std::{env, net::SocketAddr, sync::Arc};

use adventureboard_back::{
    config::{AppConfig, StoreBackend},
    dao::{
        kv_store::{KvStore, memory::MemoryKvStore},
        storage::StorageError,
    },
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};
use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    info!(store = ?config.store, "starting with storage backend");
    let app_state = init_storage(config);

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Build the shared state and start the storage supervisor for remote backends.
///
/// Remote backends start in degraded mode; sessions run on in-memory state until the
/// supervisor installs a connected store.
fn init_storage(config: AppConfig) -> SharedState {
    match config.store {
        StoreBackend::Memory => {
            warn!("using the in-memory store; session data is lost on restart");
            let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
            AppState::with_store(config, store)
        }
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            use adventureboard_back::dao::kv_store::mongodb::{MongoConfig, MongoKvStore};

            let state = AppState::new(config);
            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = MongoConfig::from_env().await?;
                let store = MongoKvStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn KvStore>)
            }));
            state
        }
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => {
            use adventureboard_back::dao::kv_store::couchdb::{CouchConfig, CouchKvStore};

            let state = AppState::new(config);
            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = CouchConfig::from_env()?;
                let store = CouchKvStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn KvStore>)
            }));
            state
        }
        #[allow(unreachable_patterns)]
        other => {
            warn!(store = ?other, "storage backend not compiled in; running without durable storage");
            AppState::new(config)
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
