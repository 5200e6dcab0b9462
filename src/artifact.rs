//! Temporary artifact: the `.docx` on disk between rendering and download.
//!
//! ## Why a file at all?
//!
//! The response streams the document from disk rather than holding every
//! in-flight result in memory twice (package bytes + response buffer). The
//! file must disappear once the response is over, whether the client read
//! it to the end, the read failed, or the client went away mid-download.
//!
//! [`TemporaryArtifact::into_body_stream`] moves ownership of the file into
//! the stream state. The file is deleted when that state is dropped, which
//! happens in all three cases above.

use crate::error::Img2DocxError;
use axum::body::Bytes;
use futures::stream::{self, Stream};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Read size for the response stream.
const CHUNK_SIZE: usize = 64 * 1024;

/// A rendered document on disk, deleted when dropped.
#[derive(Debug)]
pub struct TemporaryArtifact {
    path: TempPath,
    len: u64,
    download_name: String,
}

impl TemporaryArtifact {
    /// Write `bytes` to a new temporary `.docx` file.
    pub async fn create(bytes: &[u8], download_name: impl Into<String>) -> Result<Self, Img2DocxError> {
        let path = tempfile::Builder::new()
            .prefix("img2docx-")
            .suffix(".docx")
            .tempfile()
            .map_err(|source| Img2DocxError::ArtifactWrite { source })?
            .into_temp_path();

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| Img2DocxError::ArtifactWrite { source })?;

        debug!("Wrote temporary document {} ({} bytes)", path.display(), bytes.len());
        Ok(Self {
            path,
            len: bytes.len() as u64,
            download_name: download_name.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Name offered to the client, e.g. `scan_converted.docx`.
    pub fn download_name(&self) -> &str {
        &self.download_name
    }

    /// Stream the file contents; the file is removed when the stream ends or
    /// is dropped.
    pub fn into_body_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let guard = CleanupGuard {
            path: Some(self.path),
        };
        stream::try_unfold(
            (None::<tokio::fs::File>, guard),
            |(file, guard)| async move {
                let mut file = match file {
                    Some(file) => file,
                    None => tokio::fs::File::open(guard.path()).await?,
                };
                let mut buf = vec![0u8; CHUNK_SIZE];
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    // `file` closes before `guard` deletes the path.
                    drop(file);
                    drop(guard);
                    return Ok(None);
                }
                buf.truncate(n);
                Ok::<_, io::Error>(Some((Bytes::from(buf), (Some(file), guard))))
            },
        )
    }
}

/// Deletes the artifact file on drop.
struct CleanupGuard {
    path: Option<TempPath>,
}

impl CleanupGuard {
    fn path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let shown = path.display().to_string();
            match path.close() {
                Ok(()) => debug!("Removed temporary document {}", shown),
                Err(e) => warn!("Could not remove temporary document {}: {}", shown, e),
            }
        }
    }
}

/// Download name for an upload: `<basename>_converted.docx`.
///
/// Directory components sent by some clients (`C:\scans\a.png`) are ignored.
pub fn converted_filename(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original);
    let stem = Path::new(base)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string());
    format!("{stem}_converted.docx")
}

/// `Content-Disposition` value for `filename`.
///
/// Quotes and backslashes are replaced in the plain parameter; non-ASCII
/// names are additionally sent as an RFC 5987 `filename*`.
pub fn content_disposition(filename: &str) -> String {
    let plain: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    if filename.is_ascii() {
        return format!("attachment; filename=\"{plain}\"");
    }

    let mut encoded = String::with_capacity(filename.len() * 3);
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename=\"{plain}\"; filename*=UTF-8''{encoded}")
}
