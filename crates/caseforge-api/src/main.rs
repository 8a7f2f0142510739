//! caseforge-api server binary.

use std::net::SocketAddr;

use tracing::{info, warn};

use caseforge_api::logging::{self, LogSettings};
use caseforge_api::{router, AppState, ServerConfig};
use caseforge_db::Database;
use caseforge_inference::InferenceStack;
use caseforge_jobs::{OrchestratorConfig, PipelineBuilder, Stores};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_settings = LogSettings::from_env();
    let _file_guard = logging::init(&log_settings);
    info!(
        log_format = log_settings.format_name(),
        log_file = log_settings.file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let stack = InferenceStack::from_env()?;
    let dimension = stack.embedder.dimension();

    // Postgres when configured, otherwise process-local stores
    let stores = if std::env::var("DATABASE_URL").is_ok() {
        let db = Database::from_env(dimension).await?;
        db.migrate().await?;
        info!(dimension, "Using PostgreSQL stores");
        Stores::postgres(&db)
    } else {
        warn!("DATABASE_URL not set; using in-memory stores, data is lost on restart");
        Stores::in_memory(dimension)
    };

    let pipeline = PipelineBuilder::from_stack(stores, &stack)
        .with_config(OrchestratorConfig::from_env())
        .build()?;

    let config = ServerConfig::from_env();
    let state = AppState {
        pipeline,
        backend: stack.backend.clone(),
    };
    let app = router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
