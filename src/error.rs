//! Error types for the edgequake-img2docx library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`Img2DocxError`]: **Fatal** for one request. The conversion cannot
//!   produce a document (missing configuration, the model call failed, the
//!   upload is unusable). Returned as `Err(Img2DocxError)` from
//!   [`crate::convert::Converter::convert`] and mapped to an HTTP error by the
//!   server.
//!
//! * [`ReferenceError`]: **Non-fatal**. The optional reference document
//!   could not supply page margins. The conversion continues with the explicit
//!   margins and the reason is kept in [`crate::output::MarginSource`].
//!
//! * [`PromptFileError`]: caller-facing failures of the prompt-template
//!   endpoints. These are returned to the client as an `{"error": ...}`
//!   payload rather than as an HTTP failure.

use thiserror::Error;

/// All fatal errors returned by the edgequake-img2docx library.
#[derive(Debug, Error)]
pub enum Img2DocxError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// A required environment variable is not set (or empty).
    #[error("Missing required environment variable {var}\nSet it in the environment or in a .env file before starting the service.")]
    MissingEnv { var: &'static str },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The layout-parser pipeline was requested but no processor is configured.
    #[error("Layout-parser pipeline requires DOCAI_PROCESSOR_NAME to be set")]
    ProcessorNotConfigured,

    // ── Request errors ────────────────────────────────────────────────────
    /// The requested model id is not in the catalog.
    #[error("Unknown model '{model}'. Available: {available}")]
    UnknownModel { model: String, available: String },

    /// The request is missing a required part or carries an unusable value.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── External-call errors ──────────────────────────────────────────────
    /// The configured provider could not be created (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The model call failed. No retry is attempted.
    #[error("LLM call failed during {stage}: {message}")]
    ModelCallFailed { stage: CallStage, message: String },

    /// The layout-extraction service failed. No retry is attempted.
    #[error("Layout extraction failed: {message}")]
    LayoutExtractionFailed { message: String },

    /// HTTP URL was syntactically valid but download failed (CLI input).
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout (CLI input).
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Input file was not found at the given path (CLI input).
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: std::path::PathBuf },

    /// The document package could not be assembled.
    #[error("Failed to write document package: {0}")]
    PackageWrite(String),

    /// The output file could not be written (CLI).
    #[error("Failed to write output to '{path}': {source}")]
    OutputWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The temporary artifact could not be created or written.
    #[error("Failed to write temporary document: {source}")]
    ArtifactWrite {
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Img2DocxError {
    /// Short, stable category name used in logs and HTTP error payloads.
    pub fn category(&self) -> &'static str {
        match self {
            Img2DocxError::MissingEnv { .. }
            | Img2DocxError::InvalidConfig(_)
            | Img2DocxError::ProcessorNotConfigured
            | Img2DocxError::ProviderNotConfigured { .. } => "configuration",
            Img2DocxError::UnknownModel { .. } | Img2DocxError::InvalidRequest(_) => {
                "invalid_request"
            }
            Img2DocxError::ModelCallFailed { .. }
            | Img2DocxError::LayoutExtractionFailed { .. }
            | Img2DocxError::DownloadFailed { .. }
            | Img2DocxError::DownloadTimeout { .. } => "external_call",
            Img2DocxError::FileNotFound { .. } => "input",
            Img2DocxError::PackageWrite(_)
            | Img2DocxError::OutputWriteFailed { .. }
            | Img2DocxError::ArtifactWrite { .. }
            | Img2DocxError::Internal(_) => "internal",
        }
    }
}

/// Which model call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStage {
    /// The first transcription pass.
    Transcription,
    /// The optional correction pass.
    Correction,
}

impl std::fmt::Display for CallStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallStage::Transcription => f.write_str("transcription"),
            CallStage::Correction => f.write_str("correction"),
        }
    }
}

/// Why a reference document could not supply margins.
///
/// Never propagated as a request failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ReferenceError {
    /// Zero-length upload.
    #[error("reference document is empty")]
    Empty,

    /// Not a zip container, or `word/document.xml` is missing.
    #[error("reference document is not a readable .docx package: {0}")]
    NotAPackage(String),

    /// `word/document.xml` is not well-formed.
    #[error("reference document XML is malformed: {0}")]
    MalformedXml(String),

    /// The document body has no section properties with page margins.
    #[error("reference document has no page section")]
    NoSection,

    /// The margins leave no printable area on a Letter page.
    #[error("reference document margins do not fit the page: {0}")]
    MarginsTooWide(String),
}

/// Failures of the prompt-template endpoints, reported as structured payloads.
#[derive(Debug, Error)]
pub enum PromptFileError {
    /// The name contains a path-traversal sequence or separator.
    #[error("Invalid filename")]
    InvalidFilename,

    /// Nothing was left after reducing the name to its permitted characters.
    #[error("Invalid filename provided.")]
    EmptyFilename,

    /// The template does not exist.
    #[error("File not found")]
    NotFound,

    /// Any other I/O failure.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
