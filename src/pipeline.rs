use std::path::{Path, PathBuf};

use sqlx::Connection;

use crate::{
    error::{ImportError, Result},
    extract, fetch,
    orchestrator::{FeedImporter, ImportOptions, ImportReport},
    progress::ProgressSink,
    schema,
};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database: PathBuf,
    /// Drop and recreate all feed tables before importing.
    pub reset_schema: bool,
    pub options: ImportOptions,
}

/// Fetches (when `source` is an http(s) URL), extracts and imports a feed.
pub async fn run(
    source: &str,
    archive_path: &Path,
    feed_dir: &Path,
    store: &StoreConfig,
    progress: &mut dyn ProgressSink,
) -> Result<ImportReport> {
    let archive = if fetch::is_remote(source) {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|source_err| ImportError::Fetch {
                uri: source.to_string(),
                source: source_err,
            })?;
        fetch::fetch_archive(&client, source, archive_path).await?
    } else {
        PathBuf::from(source)
    };
    extract::extract_archive(&archive, feed_dir)?;
    load(feed_dir, store, progress).await
}

/// Imports an already extracted feed directory.
pub async fn load(
    feed_dir: &Path,
    store: &StoreConfig,
    progress: &mut dyn ProgressSink,
) -> Result<ImportReport> {
    let mut conn = schema::open_store(&store.database).await?;
    if store.reset_schema {
        schema::initialize_schema(&mut conn).await?;
    }

    let mut importer = FeedImporter::new(conn, store.options.clone());
    let report = importer.import(feed_dir, progress).await?;
    importer
        .into_connection()
        .close()
        .await
        .map_err(ImportError::Database)?;
    Ok(report)
}
