use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use omniload::{
    config::{self, StorageBackend},
    db, routes,
    services::{
        ingest::IngestService,
        memory_store::MemoryObjectStore,
        metadata_store::{MetadataStore, SqliteMetadataStore},
        object_store::ObjectStoreClient,
        s3_store::S3ObjectStore,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting omniload with config: {:?}", cfg);

    // --- Ensure spool directory exists ---
    if !cfg.spool_dir.exists() {
        std::fs::create_dir_all(&cfg.spool_dir)?;
        tracing::info!("Created spool directory at {:?}", cfg.spool_dir);
    }

    // --- Initialize SQLite connection ---
    let db = db::connect(&cfg.database_url).await?;
    db::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let store: Arc<dyn ObjectStoreClient> = match cfg.storage.backend {
        StorageBackend::S3 => Arc::new(S3ObjectStore::new(&cfg.storage).await),
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory object store; uploads are lost on restart");
            Arc::new(MemoryObjectStore::new())
        }
    };
    let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(db.clone()));
    let ingest = IngestService::new(store, metadata.clone(), cfg.ingest_config());
    let state = AppState::new(db, ingest, metadata, cfg.spool_dir.clone());

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
