//! Input resolution for the CLI: read a local image or download it from a URL.
//!
//! The HTTP service receives uploads directly; only `img2docx convert`
//! needs to turn a user-supplied argument into bytes.

use crate::error::Img2DocxError;
use crate::pipeline::encode::Upload;
use std::path::Path;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to an [`Upload`].
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Upload, Img2DocxError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<Upload, Img2DocxError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Img2DocxError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => Img2DocxError::InvalidRequest(format!("cannot read '{}': {e}", path.display())),
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    debug!("Read local input: {} ({} bytes)", path.display(), bytes.len());

    Ok(Upload::new(filename, None, bytes))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Upload, Img2DocxError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Img2DocxError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Img2DocxError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Img2DocxError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Img2DocxError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Img2DocxError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes as '{}'", bytes.len(), filename);
    Ok(Upload::new(filename, content_type, bytes.to_vec()))
}

/// Last non-empty path segment of a URL, without query or fragment.
fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    path.split('/')
        .skip(1)
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| "download".to_string())
}
