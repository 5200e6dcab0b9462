//! # edgequake-img2docx
//!
//! Convert scanned document images into formatted Word documents using
//! Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! OCR engines return text, not documents: tables lose their merged cells,
//! headings and emphasis disappear, and reading order breaks on multi-column
//! pages. Instead this crate asks a VLM to transcribe the page into HTML,
//! which it is very good at, and then turns that HTML into a `.docx` with a
//! fixed house style (margins, Arial, no heading styles, auto-fitting tables).
//!
//! ## Pipeline Overview
//!
//! ```text
//! image (+ optional reference .docx)
//!  │
//!  ├─ 1. Encode     sniff MIME type, base64 image part
//!  ├─ 2. Layout     (layout-parser pipeline only) Document AI → layout JSON
//!  ├─ 3. VLM        one call producing HTML
//!  ├─ 4. Correct    optional second call revising that HTML
//!  ├─ 5. Sanitize   strip the ```html fence
//!  ├─ 6. Render     HTML → StructuredDocument
//!  ├─ 7. Format     margins, default font, flatten headings, autofit tables
//!  └─ 8. Package    StructuredDocument → .docx bytes
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_img2docx::{
//!     write_docx, Converter, LlmModelFactory, PromptTemplates, RenderOptions, ServiceConfig,
//!     Upload,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // GOOGLE_CLOUD_PROJECT and GOOGLE_CLOUD_REGION must be set.
//!     let config = ServiceConfig::from_env()?;
//!     let converter = Converter::new(
//!         Arc::new(LlmModelFactory::new(&config)),
//!         Arc::new(PromptTemplates::load(&config.prompts_dir)),
//!     );
//!
//!     let bytes = std::fs::read("invoice.png")?;
//!     let upload = Upload::new("invoice.png", Some("image/png".into()), bytes);
//!     let options = RenderOptions::builder()
//!         .instructions("Transcribe this invoice as HTML.")
//!         .build()?;
//!
//!     let output = converter.convert(&upload, &options).await?;
//!     std::fs::write("invoice_converted.docx", write_docx(&output.document)?)?;
//!     eprintln!("{} model call(s)", output.stats.model_calls);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2docx` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-img2docx = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::{converted_filename, TemporaryArtifact};
pub use config::{
    find_model, model_catalog, ModelInfo, Pipeline, RenderOptions, RenderOptionsBuilder,
    ServiceConfig, ServiceConfigBuilder,
};
pub use convert::{render_markup, render_markup_document, save_docx, Converter};
pub use document::{PageMargins, StructuredDocument, Twips};
pub use error::{CallStage, Img2DocxError, PromptFileError, ReferenceError};
pub use output::{ConversionOutput, ConversionStats, MarginSource};
pub use pipeline::docx::write_docx;
pub use pipeline::encode::Upload;
pub use pipeline::llm::{LlmModelFactory, MarkupModel, ModelFactory};
pub use prompts::{PromptLibrary, PromptOptions, PromptTemplates};
pub use server::{build_router, start_server, AppState};
