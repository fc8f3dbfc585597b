//! camtuned - PTZ camera exposure control daemon
//!
//! Main entry point: loads the control configuration, wires one
//! protocol/controller/engine stack per camera, starts the control
//! loops and serves the stats API.

use camtuned::concurrency::ConcurrencyController;
use camtuned::config_store::{ConfigStore, ProtocolKind};
use camtuned::engine::AdjustmentEngine;
use camtuned::features::JsonFileFeatureSource;
use camtuned::protocol::create_protocol;
use camtuned::state::{AppConfig, AppState};
use camtuned::sync::{BroadcastSyncTransport, SyncTransport, TargetCache, TargetPublisher};
use camtuned::web_api;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camtuned=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camtuned v{}", env!("CARGO_PKG_VERSION"));

    let app_config = AppConfig::default();
    tracing::info!(
        config_path = %app_config.config_path.display(),
        features_dir = %app_config.features_dir.display(),
        "Configuration loaded"
    );

    // Invalid configuration is fatal before any cycle runs
    let config_store = Arc::new(ConfigStore::load(&app_config.config_path)?);
    let control = config_store.config();

    let transport: Arc<dyn SyncTransport> = Arc::new(BroadcastSyncTransport::new());
    let extractor = Arc::new(JsonFileFeatureSource::new(&app_config.features_dir));

    let mut controllers = HashMap::new();
    let mut engines = HashMap::new();
    for camera in &control.cameras {
        let kind = camera.protocol.unwrap_or(control.protocol.kind);
        let protocol = create_protocol(kind, camera, &control.protocol);
        if let Err(e) = protocol.connect().await {
            // Connection failures are retried by the per-operation path
            tracing::warn!(camera_id = %camera.camera_id, error = %e, "initial connect failed");
        }

        let mut controller = ConcurrencyController::new(
            &camera.camera_id,
            Arc::clone(&protocol),
            control.concurrency.clone(),
        );
        if kind == ProtocolKind::Visca {
            controller = controller.with_batch_size(control.protocol.visca.batch_size);
        }
        let controller = Arc::new(controller);

        let is_master = config_store.is_master(&camera.camera_id);
        let publisher = is_master
            .then(|| TargetPublisher::new(Arc::clone(&transport), camera.camera_id.clone()));
        let target_cache = if is_master {
            None
        } else {
            let cache = Arc::new(TargetCache::new(Duration::from_secs(
                control.sync.staleness_secs,
            )));
            cache.start(Arc::clone(&transport)).await?;
            Some(cache)
        };

        let engine = Arc::new(AdjustmentEngine::new(
            &camera.camera_id,
            Arc::clone(&controller),
            extractor.clone(),
            control,
            publisher,
            target_cache,
        ));
        engine.start();
        tracing::info!(
            camera_id = %camera.camera_id,
            protocol = ?kind,
            master = is_master,
            "camera control loop started"
        );

        controllers.insert(camera.camera_id.clone(), controller);
        engines.insert(camera.camera_id.clone(), engine);
    }

    let state = AppState {
        config: Arc::new(app_config.clone()),
        config_store: Arc::clone(&config_store),
        controllers,
        engines,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = web_api::create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", app_config.host, app_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
