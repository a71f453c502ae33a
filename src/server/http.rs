//! Relay HTTP server

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::relay::{sweeper, Dispatcher, Registry, Sweeper};
use crate::server::{assets, handlers, websocket};

/// Shared application state
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub config: RelayConfig,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(Arc::new(Registry::new()))),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.dispatcher.registry()
    }
}

/// Build the relay router
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // Ingestion
        .route(
            "/audio",
            post(handlers::ingest_audio)
                .layer(DefaultBodyLimit::max(state.config.max_body_bytes)),
        )
        // Viewers
        .route("/ws", get(websocket::viewer_handler))
        .route("/ws/clients", get(websocket::watcher_handler))
        // Queries
        .route("/api/clients", get(handlers::list_clients))
        .route("/api/clients/:id/chunk", get(handlers::latest_chunk))
        .route("/api/stats", get(handlers::get_stats))
        .route("/health", get(handlers::health));

    router = match &state.config.static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.fallback(assets::serve_asset),
    };

    let router = router.layer(TraceLayer::new_for_http());
    let router = if state.config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any);
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}

/// Relay server: HTTP surface plus background maintenance
pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(config: RelayConfig) -> Self {
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    /// Get shared state
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Start the stale-source sweeper and the periodic list refresh
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        let config = &self.state.config;
        let dispatcher = self.state.dispatcher.clone();

        vec![
            Sweeper::new(dispatcher.clone(), config.source_timeout()).spawn(config.sweep_interval()),
            sweeper::spawn_list_refresh(dispatcher, config.list_refresh()),
        ]
    }

    /// Serve until Ctrl+C
    pub async fn start(&self) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.state.config.bind_address, self.state.config.port)
            .parse()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Relay listening on http://{}", addr);
        tracing::info!("Viewer page: http://{}/", addr);

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let maintenance = self.spawn_maintenance();

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        for task in maintenance {
            task.abort();
        }
        let closed = self.state.registry().close_all_viewers();
        tracing::info!("Relay stopped, closed {} viewer connections", closed);

        result?;
        Ok(())
    }

    /// Start the relay in the background
    pub fn start_background(self) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.start().await })
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown requested"),
        Err(e) => {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
