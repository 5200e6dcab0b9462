//! HTTP transport: multipart upload in, `.docx` download out.
//!
//! The handlers stay thin. Each one parses its request, calls into
//! [`Converter`] or [`PromptLibrary`], and maps the result to a response.
//! Conversion failures become `{"detail": ..., "category": ...}` with a status
//! derived from [`Img2DocxError::category`]; prompt-template failures are
//! returned as `{"error": ...}` with status 200, which is what the browser
//! client expects.
//!
//! ## Routes
//!
//! | Method | Path | Body / response |
//! |--------|------|-----------------|
//! | GET  | `/health` | `{status, version}` |
//! | GET  | `/models` | model catalog |
//! | POST | `/upload` | multipart form → `<name>_converted.docx` |
//! | POST | `/preview-prompt` | five prompt fields → `{prompt}` |
//! | GET  | `/list-prompts` | `{prompts}` |
//! | GET  | `/load-prompt/{filename}` | `{content}` or `{error}` |
//! | POST | `/save-prompt` | `{filename, content}` → `{success, filename}` or `{error}` |

use crate::artifact::{content_disposition, converted_filename, TemporaryArtifact};
use crate::config::{model_catalog, Pipeline, RenderOptions, ServiceConfig, NO_CORRECTION};
use crate::convert::Converter;
use crate::error::{Img2DocxError, PromptFileError};
use crate::pipeline::docx::{write_docx, DOCX_MIME};
use crate::pipeline::encode::Upload;
use crate::pipeline::layout::DocumentAiClient;
use crate::pipeline::llm::{LlmModelFactory, ModelFactory};
use crate::prompts::{PromptLibrary, PromptOptions, PromptTemplates};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Largest accepted request body (image plus reference document).
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

// ── State ────────────────────────────────────────────────────────────────

/// Shared, read-only state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub converter: Converter,
    pub prompts: PromptLibrary,
}

impl AppState {
    pub fn new(converter: Converter, prompts: PromptLibrary) -> Self {
        Self { converter, prompts }
    }

    /// Wire up the production services from `config`.
    ///
    /// Prompt templates are read once here. The layout-parser pipeline is
    /// only available when a processor is configured.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, Img2DocxError> {
        let templates = Arc::new(PromptTemplates::load(&config.prompts_dir));
        let models: Arc<dyn ModelFactory> = Arc::new(LlmModelFactory::new(config));
        let mut converter = Converter::new(models, templates);
        match DocumentAiClient::from_config(config)? {
            Some(client) => {
                info!("Layout-parser pipeline enabled ({})", client.processor_name());
                converter = converter.with_layout_extractor(Arc::new(client));
            }
            None => info!("DOCAI_PROCESSOR_NAME not set; layout-parser pipeline disabled"),
        }
        Ok(Self::new(
            converter,
            PromptLibrary::new(config.prompts_dir.clone()),
        ))
    }
}

/// Build the router with every endpoint.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/models", get(list_models))
        .route("/upload", post(upload))
        .route("/preview-prompt", post(preview_prompt))
        .route("/list-prompts", get(list_prompts))
        .route("/load-prompt/{filename}", get(load_prompt))
        .route("/save-prompt", post(save_prompt))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the process stops.
pub async fn start_server(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await
}

// ── Errors ───────────────────────────────────────────────────────────────

/// A conversion failure rendered as an HTTP error.
#[derive(Debug)]
pub struct ApiError(pub Img2DocxError);

impl From<Img2DocxError> for ApiError {
    fn from(e: Img2DocxError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    pub category: String,
}

/// Status code for a conversion failure.
pub fn status_for(e: &Img2DocxError) -> StatusCode {
    match e {
        Img2DocxError::ProviderNotConfigured { .. } | Img2DocxError::ProcessorNotConfigured => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => match e.category() {
            "invalid_request" => StatusCode::BAD_REQUEST,
            "external_call" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed ({}): {}", self.0.category(), self.0);
        } else {
            warn!("Request rejected ({}): {}", self.0.category(), self.0);
        }
        let body = ErrorBody {
            detail: self.0.to_string(),
            category: self.0.category().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn list_models() -> impl IntoResponse {
    Json(model_catalog().to_vec())
}

/// `POST /upload`: run one conversion and stream the document back.
///
/// The temporary file is owned by the response body and removed when the
/// body is dropped, whether or not the client read it to the end.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = UploadForm::read(multipart).await?;
    let upload = form
        .file
        .ok_or_else(|| Img2DocxError::InvalidRequest("missing form field 'file'".into()))?;
    let instructions = form
        .custom_prompt
        .ok_or_else(|| Img2DocxError::InvalidRequest("missing form field 'custom_prompt'".into()))?;

    let mut builder = RenderOptions::builder()
        .model(form.model_choice)
        .pipeline(form.pipeline)
        .instructions(instructions)
        .prompt_options(form.prompt_options)
        .margins(form.margins[0], form.margins[1], form.margins[2], form.margins[3])
        .correction(form.needs_correction, form.correction_instructions);
    if let Some(reference) = form.reference_docx {
        builder = builder.reference_docx(reference);
    }
    let options = builder.build()?;

    let output = state.converter.convert(&upload, &options).await?;
    let bytes = write_docx(&output.document)?;
    let artifact = TemporaryArtifact::create(&bytes, converted_filename(&upload.filename)).await?;
    debug!("Staged artifact at {}", artifact.path().display());

    info!(
        "Serving {} ({} bytes, margins: {:?})",
        artifact.download_name(),
        artifact.len(),
        output.margins
    );

    let disposition = content_disposition(artifact.download_name());
    let len = artifact.len();
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, DOCX_MIME)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, len)
        .body(Body::from_stream(artifact.into_body_stream()))
        .map_err(|e| Img2DocxError::Internal(format!("response: {e}")))?;
    Ok(response)
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub prompt: String,
}

pub async fn preview_prompt(
    State(state): State<AppState>,
    Json(options): Json<PromptOptions>,
) -> impl IntoResponse {
    Json(PreviewResponse {
        prompt: state.converter.templates().preview(&options),
    })
}

pub async fn list_prompts(State(state): State<AppState>) -> Response {
    match state.prompts.list().await {
        Ok(prompts) => Json(serde_json::json!({ "prompts": prompts })).into_response(),
        Err(e) => prompt_error(e),
    }
}

pub async fn load_prompt(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Response {
    match state.prompts.load(&filename).await {
        Ok(content) => Json(serde_json::json!({ "content": content })).into_response(),
        Err(e) => prompt_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SavePromptRequest {
    pub filename: String,
    pub content: String,
}

pub async fn save_prompt(
    State(state): State<AppState>,
    Json(request): Json<SavePromptRequest>,
) -> Response {
    match state.prompts.save(&request.filename, &request.content).await {
        Ok(filename) => {
            Json(serde_json::json!({ "success": true, "filename": filename })).into_response()
        }
        Err(e) => prompt_error(e),
    }
}

fn prompt_error(e: PromptFileError) -> Response {
    if let PromptFileError::Io(io) = &e {
        warn!("Prompt template I/O failed: {}", io);
    }
    Json(serde_json::json!({ "error": e.to_string() })).into_response()
}

// ── Multipart form ───────────────────────────────────────────────────────

/// The fields of `POST /upload`, with their defaults applied.
#[derive(Debug)]
struct UploadForm {
    file: Option<Upload>,
    reference_docx: Option<Vec<u8>>,
    model_choice: String,
    /// top, bottom, left, right (inches)
    margins: [f64; 4],
    custom_prompt: Option<String>,
    needs_correction: bool,
    correction_instructions: String,
    pipeline: Pipeline,
    prompt_options: PromptOptions,
}

impl Default for UploadForm {
    fn default() -> Self {
        let defaults = RenderOptions::default();
        Self {
            file: None,
            reference_docx: None,
            model_choice: defaults.model,
            margins: [
                defaults.margin_top,
                defaults.margin_bottom,
                defaults.margin_left,
                defaults.margin_right,
            ],
            custom_prompt: None,
            needs_correction: false,
            correction_instructions: NO_CORRECTION.to_string(),
            pipeline: Pipeline::default(),
            prompt_options: PromptOptions::default(),
        }
    }
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, Img2DocxError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let filename = field.file_name().unwrap_or("upload").to_string();
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(bad_multipart)?;
                    form.file = Some(Upload::new(filename, content_type, bytes.to_vec()));
                }
                "reference_docx" => {
                    let has_name = field.file_name().is_some_and(|n| !n.is_empty());
                    let bytes = field.bytes().await.map_err(bad_multipart)?;
                    // Browsers send an empty, unnamed part for an untouched file input.
                    if has_name || !bytes.is_empty() {
                        form.reference_docx = Some(bytes.to_vec());
                    }
                }
                _ => {
                    let value = field.text().await.map_err(bad_multipart)?;
                    form.set_text(&name, value)?;
                }
            }
        }
        Ok(form)
    }

    fn set_text(&mut self, name: &str, value: String) -> Result<(), Img2DocxError> {
        match name {
            "model_choice" => self.model_choice = value,
            "margin_top" => self.margins[0] = parse_margin(name, &value)?,
            "margin_bottom" => self.margins[1] = parse_margin(name, &value)?,
            "margin_left" => self.margins[2] = parse_margin(name, &value)?,
            "margin_right" => self.margins[3] = parse_margin(name, &value)?,
            "custom_prompt" => self.custom_prompt = Some(value),
            "needs_correction" => self.needs_correction = parse_bool(name, &value)?,
            "correction_instructions" => self.correction_instructions = value,
            "pipeline_choice" => self.pipeline = value.parse()?,
            "signature_handling" => self.prompt_options.signature_handling = value,
            "seal_handling" => self.prompt_options.seal_handling = value,
            "currency_format" => self.prompt_options.currency_format = value,
            "numbers_format" => self.prompt_options.numbers_format = value,
            "general_instructions" => self.prompt_options.general_instructions = value,
            other => warn!("Ignoring unknown form field '{}'", other),
        }
        Ok(())
    }
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> Img2DocxError {
    Img2DocxError::InvalidRequest(format!("malformed multipart body: {e}"))
}

/// Empty means "use the default".
fn parse_margin(name: &str, value: &str) -> Result<f64, Img2DocxError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(1.0);
    }
    value
        .parse::<f64>()
        .map_err(|_| Img2DocxError::InvalidRequest(format!("{name} must be a number, got '{value}'")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, Img2DocxError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        other => Err(Img2DocxError::InvalidRequest(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallStage;

    #[test]
    fn status_codes_follow_category() {
        assert_eq!(
            status_for(&Img2DocxError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&Img2DocxError::UnknownModel {
                model: "m".into(),
                available: "a".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&Img2DocxError::ModelCallFailed {
                stage: CallStage::Correction,
                message: "boom".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&Img2DocxError::ProcessorNotConfigured),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&Img2DocxError::PackageWrite("zip".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn form_values_parse() {
        assert!(parse_bool("needs_correction", "True").unwrap());
        assert!(parse_bool("needs_correction", "on").unwrap());
        assert!(!parse_bool("needs_correction", "false").unwrap());
        assert!(parse_bool("needs_correction", "maybe").is_err());

        assert_eq!(parse_margin("margin_top", " 0.75 ").unwrap(), 0.75);
        assert_eq!(parse_margin("margin_top", "").unwrap(), 1.0);
        assert!(parse_margin("margin_top", "wide").is_err());
    }

    #[test]
    fn text_fields_fill_the_form() {
        let mut form = UploadForm::default();
        form.set_text("margin_left", "0.5".into()).unwrap();
        form.set_text("pipeline_choice", "staged".into()).unwrap();
        form.set_text("seal_handling", "[Seal]".into()).unwrap();
        form.set_text("unrelated", "x".into()).unwrap();
        assert_eq!(form.margins, [1.0, 1.0, 0.5, 1.0]);
        assert_eq!(form.pipeline, Pipeline::Staged);
        assert_eq!(form.prompt_options.seal_handling, "[Seal]");
        assert_eq!(form.correction_instructions, NO_CORRECTION);
        assert!(form.set_text("pipeline_choice", "Z".into()).is_err());
    }
}
