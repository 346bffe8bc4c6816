//! Formflow Server - HTTP host embedding the traversal engine
//!
//! A thin axum surface over [`formflow_engine::FlowEngine`]: one traversal
//! endpoint plus a health probe. All questionnaire state lives in the graph;
//! the server holds only the shared engine and its configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use formflow_engine::{FlowEngine, Neo4jGraphStore, RestrictedSandbox};
use tracing::info;

pub mod api;
pub mod config;
pub mod error;

pub use config::ServerConfig;

/// Shared state handed to every handler.
pub struct AppState {
    pub engine: FlowEngine,
    pub config: ServerConfig,
}

/// Initialize tracing from the environment
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level.to_string())),
        )
        .with_target(true)
        .init();
}

/// Connects the graph store, assembles the engine and serves the API until
/// the process is stopped.
pub async fn run(config: ServerConfig) -> Result<()> {
    let store = Neo4jGraphStore::connect(config.neo4j_config())
        .await
        .context("Failed to connect to Neo4j")?;
    let engine = FlowEngine::with_defaults(
        Arc::new(store),
        Arc::new(RestrictedSandbox::new()),
        config.evaluator_defaults(),
    );

    let bind = format!("{}:{}", config.bind_address, config.port);
    let state = Arc::new(AppState { engine, config });
    let router = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on {}", bind);
    axum::serve(listener, router)
        .await
        .context("Server error")?;
    Ok(())
}
