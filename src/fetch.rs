use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::{ImportError, Result};

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Downloads `uri` to `destination`, writing the body as it arrives.
pub async fn fetch_archive(
    client: &reqwest::Client,
    uri: &str,
    destination: &Path,
) -> Result<PathBuf> {
    log::info!("Downloading {} to {:?}", uri, destination);
    let fetch_err = |source| ImportError::Fetch {
        uri: uri.to_string(),
        source,
    };
    let io_err = |source| ImportError::Io {
        path: destination.to_path_buf(),
        source,
    };

    let response = client
        .get(uri)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(fetch_err)?;

    let mut file = tokio::fs::File::create(destination).await.map_err(io_err)?;
    let mut body = response.bytes_stream();
    let mut downloaded = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(fetch_err)?;
        file.write_all(&chunk).await.map_err(io_err)?;
        downloaded += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;

    log::info!("Downloaded {} bytes", downloaded);
    Ok(destination.to_path_buf())
}
