use anyhow::{Context, Result};
use facematch_core::{FaceMatchEngine, OnnxProvider};
use facematch_media::ImageRsCodec;
use facematch_store::SqliteIdentityStore;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facematchd starting");

    let config = config::Config::from_env()?;

    let mut provider = OnnxProvider::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    provider
        .preload(config.engine.detection_model)
        .context("loading detection model")?;

    let store = SqliteIdentityStore::open(&config.db_path)
        .with_context(|| format!("opening identity store {}", config.db_path.display()))?;

    tracing::info!(
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        image_root = %config.engine.image_root.display(),
        detection_model = ?config.engine.detection_model,
        "engine configured"
    );

    let engine = FaceMatchEngine::new(provider, ImageRsCodec, config.engine);
    let handle = engine::spawn_engine(engine, store, engine::ffmpeg_opener())
        .context("spawning engine thread")?;

    let app = routes::router(routes::AppState { engine: handle }, config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;

    tracing::info!(addr = %config.bind, "facematchd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("facematchd shutting down");
        })
        .await?;

    Ok(())
}
