//! Daemon entry point: REST + WebSocket server over the container engine.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use stevedore_core::EngineConnector;
use stevedore_relay::{BroadcastRouter, EventListener, SubscriptionRegistry};
use stevedore_server::{
    AppConfig, LocalEngine,
    routes::{AppState, create_api_router},
    store::{self, ProfileStore},
};
use stevedore_session::ExecSessionManager;
use stevedore_transport::{ChannelState, create_ws_router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ENGINE_ENDPOINT: &str = "unix:///var/run/docker.sock";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::resolve();
    config
        .ensure_paths()
        .context("failed to create state directories")?;

    let store = open_store(&config).await?;
    let endpoint = std::env::var("DOCKER_HOST")
        .unwrap_or_else(|_| DEFAULT_ENGINE_ENDPOINT.to_string());
    let default_profile = store::seed_default(store.as_ref(), &endpoint)
        .await
        .context("failed to seed default connection profile")?;
    tracing::info!(endpoint = %default_profile.endpoint(), "default connection profile");

    let engine = Arc::new(LocalEngine::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let sessions = Arc::new(ExecSessionManager::new());

    let listener = EventListener::new(
        Arc::clone(&engine),
        BroadcastRouter::new(Arc::clone(&registry)),
    );
    tokio::spawn(listener.run());

    let connector: Arc<dyn EngineConnector> = Arc::clone(&engine) as _;
    let api_state = AppState {
        engine: Arc::clone(&engine),
        store,
        connector,
        sessions: Arc::clone(&sessions),
    };
    let channel_state = ChannelState {
        engine,
        registry,
        sessions,
    };

    let app = create_api_router(api_state)
        .merge(create_ws_router(channel_state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = std::env::var("STEVEDORE_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()
        .context("invalid STEVEDORE_ADDR")?;
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ProfileStore>> {
    #[cfg(feature = "sqlite")]
    {
        let store = stevedore_server::store::SqliteProfileStore::open(&config.db_path())
            .await
            .context("failed to open profile database")?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        let _ = config;
        Ok(Arc::new(stevedore_server::store::MemoryProfileStore::new()))
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
