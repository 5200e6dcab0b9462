//! Pipeline stages for image-to-DOCX conversion.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets the
//! orchestration in [`crate::convert`] stay a short sequence of calls.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ [layout] ──▶ llm ──▶ [correct] ──▶ sanitize ──▶ render ──▶ postprocess ──▶ docx
//! (path/URL) (base64)   (DocAI)     (VLM)    (2nd pass)    (fences)     (HTML)     (format rules)   (OOXML)
//! ```
//!
//! 1. [`input`]: read a local file or download from a URL (CLI only)
//! 2. [`encode`]: sniff the MIME type and base64-wrap the upload
//! 3. [`layout`]: optional layout extraction for the layout-parser pipeline
//! 4. [`llm`]: the model call; the only stage talking to a VLM
//! 5. [`correct`]: optional second pass over the first answer
//! 6. [`sanitize`]: strip the code fence around the returned HTML
//! 7. [`render`]: HTML → [`crate::document::StructuredDocument`]
//! 8. [`postprocess`]: margins (with [`reference`]), font, headings, tables
//! 9. [`docx`]: serialise the document into a `.docx` package

pub mod correct;
pub mod docx;
pub mod encode;
pub mod input;
pub mod layout;
pub mod llm;
pub mod postprocess;
pub mod reference;
pub mod render;
pub mod sanitize;
