//! API server setup.

use super::{handlers::AppState, routes::create_router};
use crate::config::ApiConfig;
use crate::engine::DuelEngine;
use axum::http::{HeaderValue, Method};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

pub struct ApiServer {
    config: ApiConfig,
    engine: Arc<DuelEngine>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, engine: Arc<DuelEngine>) -> Self {
        Self { config, engine }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let state = Arc::new(AppState {
            engine: self.engine,
        });

        let router = create_router(state)
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
            .layer(build_cors_layer(&self.config.cors_origins));

        let addr: SocketAddr =
            format!("{}:{}", self.config.listen_address, self.config.port).parse()?;
        info!("Duel engine API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

/// Convenience entry point used by the binary.
pub async fn run_server(
    config: ApiConfig,
    engine: Arc<DuelEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
    ApiServer::new(config, engine).run().await
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(tower_http::cors::Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
