// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::application::archive_repository::ArchiveRepository;
use crate::application::query_service::QueryService;
use crate::application::stream_service::StreamQueryService;
use crate::infrastructure::archiver_client::ArchiverClient;
use crate::infrastructure::config::load_gateway_config;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    find_pvs, health_check, list_functions, run_query, run_stream,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = load_gateway_config()?;

    // Create repository (infrastructure layer)
    let repository: Arc<dyn ArchiveRepository> =
        Arc::new(ArchiverClient::new(config.archiver.url));

    // Create services (application layer)
    let query_service = QueryService::new(repository.clone());
    let stream_service = StreamQueryService::new(repository);

    // Create application state
    let state = Arc::new(AppState {
        query_service,
        stream_service,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/functions", get(list_functions))
        .route("/pvs", get(find_pvs))
        .route("/query", post(run_query))
        .route("/stream", post(run_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = "0.0.0.0:8080".parse().unwrap();
    println!("Starting archive-gateway service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
