use crate::api::{ApiServer, AppState};
use crate::blob::LocalBlobStore;
use crate::config::Config;
use crate::global;
use crate::store::SqliteStore;
use crate::transcription::{ProviderRegistry, TranscriptionService};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run_service(config_path: Option<PathBuf>) -> Result<()> {
    info!("Starting Meetscribe service");

    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let db_path = match &config.storage.db_path {
        Some(path) => path.clone(),
        None => global::db_file()?,
    };
    let store = Arc::new(SqliteStore::open(&db_path)?);
    info!("Meeting store at {:?}", db_path);

    let media_dir = match &config.storage.media_dir {
        Some(path) => path.clone(),
        None => global::media_dir()?,
    };
    let media_base_url = config.storage.media_base_url.clone().unwrap_or_else(|| {
        format!("{}/media", config.server.public_url.trim_end_matches('/'))
    });
    let blob = Arc::new(LocalBlobStore::new(media_dir, media_base_url));

    let registry = Arc::new(ProviderRegistry::new(config.transcription.clone()));

    let webhook_secret = if config.webhook.secret.is_empty() {
        warn!("No webhook secret configured; inbound callbacks are unauthenticated");
        None
    } else {
        Some(config.webhook.secret.clone())
    };

    let service = Arc::new(TranscriptionService::new(
        store.clone(),
        registry,
        webhook_secret,
        config.server.public_url.clone(),
    ));

    let state = AppState {
        store,
        blob,
        service,
    };

    info!("Meetscribe is ready!");
    ApiServer::new(config.server.port, state).start().await
}
