//! Conversion entry points: one upload in, one formatted document out.
//!
//! ## One core, three pipelines
//!
//! The [`Pipeline`] variants differ only in how the first markup is obtained
//! (which prompt, whether layout extraction runs first). Everything after
//! that is shared: the optional correction pass, then
//! Sanitizer → Renderer → Post-Processor. Nothing here touches HTTP; the
//! server and the CLI both call [`Converter::convert`].

use crate::config::{Pipeline, RenderOptions};
use crate::document::{PageMargins, StructuredDocument};
use crate::error::{CallStage, Img2DocxError};
use crate::output::{ConversionOutput, ConversionStats, MarginSource};
use crate::pipeline::correct::{needs_correction, run_correction};
use crate::pipeline::docx::write_docx;
use crate::pipeline::encode::{encode_upload, Upload};
use crate::pipeline::layout::LayoutExtractor;
use crate::pipeline::llm::{MarkupModel, ModelFactory, ModelReply, ModelRequest};
use crate::pipeline::postprocess::format_document;
use crate::pipeline::render::render_html;
use crate::pipeline::sanitize::MarkupDocument;
use crate::prompts::{layout_prompt, staged_prompt, PromptTemplates};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Orchestrates one conversion per call. Cheap to clone and share.
#[derive(Clone)]
pub struct Converter {
    models: Arc<dyn ModelFactory>,
    templates: Arc<PromptTemplates>,
    layout: Option<Arc<dyn LayoutExtractor>>,
}

impl Converter {
    pub fn new(models: Arc<dyn ModelFactory>, templates: Arc<PromptTemplates>) -> Self {
        Self {
            models,
            templates,
            layout: None,
        }
    }

    /// Enable [`Pipeline::LayoutParser`].
    pub fn with_layout_extractor(mut self, extractor: Arc<dyn LayoutExtractor>) -> Self {
        self.layout = Some(extractor);
        self
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    /// Convert an uploaded image into a formatted document.
    ///
    /// # Errors
    /// - [`Img2DocxError::InvalidRequest`] for an empty upload
    /// - [`Img2DocxError::UnknownModel`] / [`Img2DocxError::ProviderNotConfigured`]
    /// - [`Img2DocxError::ProcessorNotConfigured`] for the layout pipeline
    ///   without a processor
    /// - [`Img2DocxError::ModelCallFailed`] / [`Img2DocxError::LayoutExtractionFailed`]
    ///
    /// A reference document that cannot be read is *not* an error; see
    /// [`ConversionOutput::margins`].
    pub async fn convert(
        &self,
        upload: &Upload,
        options: &RenderOptions,
    ) -> Result<ConversionOutput, Img2DocxError> {
        let start = Instant::now();
        info!(
            "Converting '{}' ({} bytes) with {} via {:?} pipeline",
            upload.filename,
            upload.bytes.len(),
            options.model,
            options.pipeline
        );

        // ── Step 1: Validate prerequisites before any external call ──────
        if upload.bytes.is_empty() {
            return Err(Img2DocxError::InvalidRequest(format!(
                "uploaded file '{}' is empty",
                upload.filename
            )));
        }
        let layout = match options.pipeline {
            Pipeline::LayoutParser => Some(
                self.layout
                    .as_ref()
                    .ok_or(Img2DocxError::ProcessorNotConfigured)?,
            ),
            _ => None,
        };
        let model = self.models.model(&options.model)?;

        let mut stats = ConversionStats::default();

        // ── Step 2: First transcription pass ─────────────────────────────
        let request = match layout {
            Some(extractor) => {
                let layout_json = extractor.extract(&upload.bytes, &upload.mime_type()).await?;
                stats.layout_extracted = true;
                ModelRequest::text(CallStage::Transcription, layout_json)
                    .with_system(layout_prompt(&options.instructions))
            }
            None => {
                let image = encode_upload(upload)?;
                ModelRequest::with_image(
                    CallStage::Transcription,
                    image,
                    self.first_pass_text(options),
                )
            }
        };
        let reply = call(model.as_ref(), request, &mut stats).await?;
        let mut markup = MarkupDocument::new(reply.content);

        // ── Step 3: Optional correction pass ─────────────────────────────
        if needs_correction(options.needs_correction, &options.correction_instructions) {
            let (corrected, reply) = run_correction(
                model.as_ref(),
                &self.templates,
                &options.correction_instructions,
                &markup,
            )
            .await?;
            record(&mut stats, &reply);
            stats.corrected = true;
            markup = corrected;
        }

        // ── Step 4: Sanitize → render → format ───────────────────────────
        let (document, margins) = render_markup_document(
            markup.raw(),
            options.reference_docx.as_deref(),
            options.explicit_margins(),
        );
        stats.blocks = document.blocks.len();
        stats.tables = document.tables().len();
        stats.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Conversion complete: {} model call(s), {} blocks, {} tables, {}ms",
            stats.model_calls, stats.blocks, stats.tables, stats.duration_ms
        );

        Ok(ConversionOutput {
            markup: markup.sanitized().to_string(),
            document,
            pipeline: options.pipeline,
            model: options.model.clone(),
            margins,
            stats,
        })
    }

    /// Render markup that already exists (no model call).
    pub fn render_markup(&self, markup: &str, options: &RenderOptions) -> ConversionOutput {
        render_markup(markup, options)
    }

    /// Text sent next to the image in the first pass.
    fn first_pass_text(&self, options: &RenderOptions) -> String {
        match options.pipeline {
            Pipeline::Staged => staged_prompt(&options.instructions),
            _ if options.instructions.trim().is_empty() => {
                self.templates.preview(&options.prompt_options)
            }
            _ => options.instructions.clone(),
        }
    }
}

async fn call(
    model: &dyn MarkupModel,
    request: ModelRequest,
    stats: &mut ConversionStats,
) -> Result<ModelReply, Img2DocxError> {
    let reply = model.generate(request).await?;
    record(stats, &reply);
    Ok(reply)
}

fn record(stats: &mut ConversionStats, reply: &ModelReply) {
    stats.model_calls += 1;
    stats.input_tokens += reply.input_tokens as u64;
    stats.output_tokens += reply.output_tokens as u64;
}

/// Offline conversion: markup in, formatted document out, no model call.
pub fn render_markup(markup: &str, options: &RenderOptions) -> ConversionOutput {
    let start = Instant::now();
    let (document, margins) = render_markup_document(
        markup,
        options.reference_docx.as_deref(),
        options.explicit_margins(),
    );
    let stats = ConversionStats {
        blocks: document.blocks.len(),
        tables: document.tables().len(),
        duration_ms: start.elapsed().as_millis() as u64,
        ..ConversionStats::default()
    };
    ConversionOutput {
        markup: MarkupDocument::new(markup).sanitized().to_string(),
        document,
        pipeline: options.pipeline,
        model: options.model.clone(),
        margins,
        stats,
    }
}

/// Sanitize raw model output, render it, and apply every formatting rule.
pub fn render_markup_document(
    raw: &str,
    reference_docx: Option<&[u8]>,
    explicit: PageMargins,
) -> (StructuredDocument, MarginSource) {
    let markup = MarkupDocument::new(raw);
    debug!("Rendering markup (fence: {:?})", markup.fence());
    let mut document = render_html(markup.sanitized());
    let margins = format_document(&mut document, reference_docx, explicit);
    (document, margins)
}

/// Write `doc` as `.docx` to `path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn save_docx(
    doc: &StructuredDocument,
    path: impl AsRef<Path>,
) -> Result<u64, Img2DocxError> {
    let path = path.as_ref();
    let bytes = write_docx(doc)?;
    let io_err = |source| Img2DocxError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let tmp_path = path.with_extension("docx.tmp");
    tokio::fs::write(&tmp_path, &bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err)?;

    Ok(bytes.len() as u64)
}
