mod config;
mod engine;
mod handlers;
mod label;
mod mapper;
mod preprocess;
mod types;
mod upload;
mod vit_engine;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;

use config::Config;
use handlers::AppState;
use upload::ScratchDir;
use vit_engine::{VitConfig, VitEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvest_classifier=debug".into()),
        )
        .init();

    let config = Config::parse();
    tracing::info!("Starting harvest classifier with config: {:?}", config);

    let scratch = ScratchDir::create(&config.scratch_dir)?;
    tracing::info!(scratch_dir = %scratch.path().display(), "Scratch directory ready");

    let vit_config = VitConfig {
        model_id: config.model_id.clone(),
        model_path: config.model_path.clone(),
        revision: config.model_revision.clone(),
        use_pth: config.use_pth,
        cpu: config.cpu_only,
        id2label: config.parse_id2label(),
    };

    tracing::info!("Loading ViT model...");
    let engine = VitEngine::new(vit_config).await?;
    tracing::info!("Model loaded successfully");

    let state = AppState::new(Arc::new(engine), scratch, config.legacy_error_status);

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = handlers::router(state, config.max_upload_bytes)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer);

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());
    if config.legacy_error_status {
        tracing::warn!("Legacy error status enabled: failed requests answer 200 OK");
    }

    axum::serve(listener, app).await?;
    Ok(())
}
