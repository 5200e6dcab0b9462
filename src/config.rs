//! Configuration types for image-to-DOCX conversion.
//!
//! Two layers of configuration exist:
//!
//! * [`ServiceConfig`]: process-wide, read once at startup from the
//!   environment. Missing cloud identifiers are a startup error so the
//!   service never accepts a request it cannot serve.
//! * [`RenderOptions`]: per request, built by the transport layer (or the
//!   CLI) and never mutated afterwards.
//!
//! The model catalog is a process-wide read-only table initialised once and
//! exposed through [`model_catalog`] / [`find_model`].

use crate::document::{PageMargins, Section};
use crate::error::Img2DocxError;
use crate::prompts::PromptOptions;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default model used when a request does not name one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Sentinel meaning "no correction instructions supplied".
pub const NO_CORRECTION: &str = "None";

// ── Model catalog ────────────────────────────────────────────────────────

/// A selectable model. Pricing is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub pricing_input: String,
    pub pricing_output: String,
}

static MODEL_CATALOG: Lazy<Vec<ModelInfo>> = Lazy::new(|| {
    vec![
        ModelInfo {
            id: "gemini-2.5-flash".into(),
            name: "Gemini 2.5 Flash".into(),
            pricing_input: "$0.075 / 1M tokens".into(),
            pricing_output: "$0.30 / 1M tokens".into(),
        },
        ModelInfo {
            id: "gemini-2.5-pro".into(),
            name: "Gemini 2.5 Pro".into(),
            pricing_input: "$7.00 / 1M tokens".into(),
            pricing_output: "$21.00 / 1M tokens".into(),
        },
    ]
});

/// Every model a request may select, in display order.
pub fn model_catalog() -> &'static [ModelInfo] {
    &MODEL_CATALOG
}

/// Look up a model by id.
pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    MODEL_CATALOG.iter().find(|m| m.id == id)
}

// ── Service configuration ────────────────────────────────────────────────

/// Process-wide configuration, read once at startup.
///
/// # Example
/// ```rust
/// use edgequake_img2docx::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .project_id("my-project")
///     .region("us-central1")
///     .build()
///     .unwrap();
/// assert_eq!(config.provider, "gemini");
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Cloud project identifier (`GOOGLE_CLOUD_PROJECT`). Required.
    pub project_id: String,

    /// Cloud region identifier (`GOOGLE_CLOUD_REGION`). Required.
    pub region: String,

    /// Layout-parser processor resource name (`DOCAI_PROCESSOR_NAME`),
    /// e.g. `projects/P/locations/us/processors/ID`.
    ///
    /// Only needed by [`Pipeline::LayoutParser`]; its absence is reported
    /// per request, not at startup.
    pub processor_name: Option<String>,

    /// OAuth bearer token for the layout-parser REST API (`DOCAI_ACCESS_TOKEN`).
    pub access_token: Option<String>,

    /// edgequake-llm provider name (`IMG2DOCX_PROVIDER`). Default: `gemini`.
    pub provider: String,

    /// Directory holding prompt templates (`IMG2DOCX_PROMPTS_DIR`). Default: `prompts`.
    pub prompts_dir: PathBuf,

    /// Sampling temperature for every model call. Default: 0.1.
    ///
    /// Transcription wants the model faithful to the page, not creative.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 8192.
    ///
    /// A dense single page rendered as HTML (inline styles, table markup)
    /// is much longer than the same page as Markdown.
    pub max_tokens: usize,

    /// Timeout for the layout-parser HTTP call in seconds. Default: 120.
    pub layout_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            region: String::new(),
            processor_name: None,
            access_token: None,
            provider: "gemini".to_string(),
            prompts_dir: PathBuf::from("prompts"),
            temperature: 0.1,
            max_tokens: 8192,
            layout_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("project_id", &self.project_id)
            .field("region", &self.region)
            .field("processor_name", &self.processor_name)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("provider", &self.provider)
            .field("prompts_dir", &self.prompts_dir)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read the configuration from the process environment.
    ///
    /// # Errors
    /// [`Img2DocxError::MissingEnv`] when `GOOGLE_CLOUD_PROJECT` or
    /// `GOOGLE_CLOUD_REGION` is unset or empty.
    pub fn from_env() -> Result<Self, Img2DocxError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Img2DocxError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let project_id = get("GOOGLE_CLOUD_PROJECT").ok_or(Img2DocxError::MissingEnv {
            var: "GOOGLE_CLOUD_PROJECT",
        })?;
        let region = get("GOOGLE_CLOUD_REGION").ok_or(Img2DocxError::MissingEnv {
            var: "GOOGLE_CLOUD_REGION",
        })?;

        let mut builder = Self::builder().project_id(project_id).region(region);
        if let Some(name) = get("DOCAI_PROCESSOR_NAME") {
            builder = builder.processor_name(name);
        }
        if let Some(token) = get("DOCAI_ACCESS_TOKEN") {
            builder = builder.access_token(token);
        }
        if let Some(provider) = get("IMG2DOCX_PROVIDER") {
            builder = builder.provider(provider);
        }
        if let Some(dir) = get("IMG2DOCX_PROMPTS_DIR") {
            builder = builder.prompts_dir(dir);
        }
        builder.build()
    }

    /// Location segment of the processor resource name, falling back to the
    /// configured region.
    pub fn layout_location(&self) -> &str {
        self.processor_name
            .as_deref()
            .and_then(|name| {
                let mut parts = name.split('/');
                while let Some(part) = parts.next() {
                    if part == "locations" {
                        return parts.next();
                    }
                }
                None
            })
            .unwrap_or(self.region.as_str())
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.config.project_id = id.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = region.into();
        self
    }

    pub fn processor_name(mut self, name: impl Into<String>) -> Self {
        self.config.processor_name = Some(name.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.config.access_token = Some(token.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.config.provider = provider.into();
        self
    }

    pub fn prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.prompts_dir = dir.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn layout_timeout_secs(mut self, secs: u64) -> Self {
        self.config.layout_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Img2DocxError> {
        let c = &self.config;
        if c.project_id.trim().is_empty() {
            return Err(Img2DocxError::MissingEnv {
                var: "GOOGLE_CLOUD_PROJECT",
            });
        }
        if c.region.trim().is_empty() {
            return Err(Img2DocxError::MissingEnv {
                var: "GOOGLE_CLOUD_REGION",
            });
        }
        if c.provider.trim().is_empty() {
            return Err(Img2DocxError::InvalidConfig(
                "provider name must not be empty".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(Img2DocxError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Per-request options ──────────────────────────────────────────────────

/// Which upstream sequence produces the markup.
///
/// | Pipeline | External calls |
/// |----------|----------------|
/// | `Direct` | model(image, instructions) |
/// | `Staged` | model(image, staged prompt with instructions as context) |
/// | `LayoutParser` | layout service(bytes) → model(layout prompt, layout JSON) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    #[default]
    Direct,
    Staged,
    LayoutParser,
}

impl std::str::FromStr for Pipeline {
    type Err = Img2DocxError;

    /// Accepts the long names and the historical single-letter codes
    /// (`C` = staged, `B` = layout parser).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "direct" => Ok(Pipeline::Direct),
            "staged" | "c" => Ok(Pipeline::Staged),
            "layout_parser" | "layout-parser" | "layout" | "b" => Ok(Pipeline::LayoutParser),
            other => Err(Img2DocxError::InvalidRequest(format!(
                "unknown pipeline '{other}' (expected direct, staged or layout_parser)"
            ))),
        }
    }
}

/// Everything one conversion request asks for.
///
/// Built via [`RenderOptions::builder()`].
#[derive(Clone)]
pub struct RenderOptions {
    /// Model id; must be in [`model_catalog`]. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Upstream sequence. Default: [`Pipeline::Direct`].
    pub pipeline: Pipeline,

    /// Free-text instructions sent with the image.
    pub instructions: String,

    /// Fields for the base template, used when `instructions` is empty.
    pub prompt_options: PromptOptions,

    /// Explicit margins in inches, applied when no usable reference document
    /// is supplied. Default: 1.0 each.
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub margin_right: f64,

    /// Optional `.docx` whose first section's margins win over the explicit ones.
    pub reference_docx: Option<Vec<u8>>,

    /// Run one correction pass. Default: false.
    pub needs_correction: bool,

    /// Correction instructions; [`NO_CORRECTION`] disables the pass.
    pub correction_instructions: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            pipeline: Pipeline::default(),
            instructions: String::new(),
            prompt_options: PromptOptions::default(),
            margin_top: 1.0,
            margin_bottom: 1.0,
            margin_left: 1.0,
            margin_right: 1.0,
            reference_docx: None,
            needs_correction: false,
            correction_instructions: NO_CORRECTION.to_string(),
        }
    }
}

impl fmt::Debug for RenderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderOptions")
            .field("model", &self.model)
            .field("pipeline", &self.pipeline)
            .field("instructions_len", &self.instructions.len())
            .field("margins", &[
                self.margin_top,
                self.margin_bottom,
                self.margin_left,
                self.margin_right,
            ])
            .field(
                "reference_docx",
                &self.reference_docx.as_ref().map(|b| format!("<{} bytes>", b.len())),
            )
            .field("needs_correction", &self.needs_correction)
            .field("correction_instructions", &self.correction_instructions)
            .finish()
    }
}

impl RenderOptions {
    /// Create a new builder for `RenderOptions`.
    pub fn builder() -> RenderOptionsBuilder {
        RenderOptionsBuilder {
            options: Self::default(),
        }
    }

    /// The explicit margins as a [`PageMargins`].
    pub fn explicit_margins(&self) -> PageMargins {
        PageMargins::from_inches(
            self.margin_top,
            self.margin_bottom,
            self.margin_left,
            self.margin_right,
        )
    }
}

/// Builder for [`RenderOptions`].
#[derive(Debug)]
pub struct RenderOptionsBuilder {
    options: RenderOptions,
}

impl RenderOptionsBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = model.into();
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.options.pipeline = pipeline;
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.options.instructions = text.into();
        self
    }

    pub fn prompt_options(mut self, options: PromptOptions) -> Self {
        self.options.prompt_options = options;
        self
    }

    /// Set all four margins (inches) at once.
    pub fn margins(mut self, top: f64, bottom: f64, left: f64, right: f64) -> Self {
        self.options.margin_top = top;
        self.options.margin_bottom = bottom;
        self.options.margin_left = left;
        self.options.margin_right = right;
        self
    }

    pub fn margin_top(mut self, inches: f64) -> Self {
        self.options.margin_top = inches;
        self
    }

    pub fn margin_bottom(mut self, inches: f64) -> Self {
        self.options.margin_bottom = inches;
        self
    }

    pub fn margin_left(mut self, inches: f64) -> Self {
        self.options.margin_left = inches;
        self
    }

    pub fn margin_right(mut self, inches: f64) -> Self {
        self.options.margin_right = inches;
        self
    }

    pub fn reference_docx(mut self, bytes: Vec<u8>) -> Self {
        self.options.reference_docx = Some(bytes);
        self
    }

    pub fn correction(mut self, enabled: bool, instructions: impl Into<String>) -> Self {
        self.options.needs_correction = enabled;
        self.options.correction_instructions = instructions.into();
        self
    }

    /// Build the options, validating constraints.
    pub fn build(self) -> Result<RenderOptions, Img2DocxError> {
        let o = &self.options;
        if find_model(&o.model).is_none() {
            return Err(Img2DocxError::UnknownModel {
                model: o.model.clone(),
                available: model_catalog()
                    .iter()
                    .map(|m| m.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        for (side, value) in [
            ("top", o.margin_top),
            ("bottom", o.margin_bottom),
            ("left", o.margin_left),
            ("right", o.margin_right),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Img2DocxError::InvalidRequest(format!(
                    "margin_{side} must be a non-negative number of inches, got {value}"
                )));
            }
        }
        if !Section::default().fits(&self.options.explicit_margins()) {
            return Err(Img2DocxError::InvalidRequest(format!(
                "margins (top {}, bottom {}, left {}, right {}) leave no room on a Letter page",
                o.margin_top, o.margin_bottom, o.margin_left, o.margin_right
            )));
        }
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn from_lookup_requires_project_and_region() {
        let err = ServiceConfig::from_lookup(env(&[("GOOGLE_CLOUD_REGION", "us-central1")]))
            .unwrap_err();
        assert!(matches!(
            err,
            Img2DocxError::MissingEnv {
                var: "GOOGLE_CLOUD_PROJECT"
            }
        ));

        let err = ServiceConfig::from_lookup(env(&[("GOOGLE_CLOUD_PROJECT", "p")])).unwrap_err();
        assert!(matches!(
            err,
            Img2DocxError::MissingEnv {
                var: "GOOGLE_CLOUD_REGION"
            }
        ));
    }

    #[test]
    fn from_lookup_treats_blank_as_missing() {
        let err = ServiceConfig::from_lookup(env(&[
            ("GOOGLE_CLOUD_PROJECT", "  "),
            ("GOOGLE_CLOUD_REGION", "us-central1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Img2DocxError::MissingEnv { .. }));
    }

    #[test]
    fn from_lookup_reads_optional_values() {
        let config = ServiceConfig::from_lookup(env(&[
            ("GOOGLE_CLOUD_PROJECT", "p"),
            ("GOOGLE_CLOUD_REGION", "europe-west1"),
            ("DOCAI_PROCESSOR_NAME", "projects/p/locations/eu/processors/abc"),
            ("IMG2DOCX_PROMPTS_DIR", "/srv/prompts"),
        ]))
        .unwrap();
        assert_eq!(config.provider, "gemini");
        assert_eq!(config.prompts_dir, PathBuf::from("/srv/prompts"));
        assert_eq!(config.layout_location(), "eu");
    }

    #[test]
    fn layout_location_falls_back_to_region() {
        let config = ServiceConfig::builder()
            .project_id("p")
            .region("us-central1")
            .build()
            .unwrap();
        assert_eq!(config.layout_location(), "us-central1");
    }

    #[test]
    fn debug_redacts_access_token() {
        let config = ServiceConfig::builder()
            .project_id("p")
            .region("r")
            .access_token("secret-token")
            .build()
            .unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("secret-token"));
    }

    #[test]
    fn render_options_defaults() {
        let o = RenderOptions::builder().build().unwrap();
        assert_eq!(o.model, DEFAULT_MODEL);
        assert_eq!(o.pipeline, Pipeline::Direct);
        assert_eq!(o.explicit_margins(), PageMargins::one_inch());
        assert!(!o.needs_correction);
        assert_eq!(o.correction_instructions, NO_CORRECTION);
    }

    #[test]
    fn render_options_rejects_unknown_model() {
        let err = RenderOptions::builder().model("gpt-4o").build().unwrap_err();
        assert!(matches!(err, Img2DocxError::UnknownModel { .. }));
        assert!(err.to_string().contains("gemini-2.5-pro"));
    }

    #[test]
    fn render_options_rejects_negative_margin() {
        let err = RenderOptions::builder().margin_left(-0.5).build().unwrap_err();
        assert!(err.to_string().contains("margin_left"));
        assert!(RenderOptions::builder().margin_top(f64::NAN).build().is_err());
    }

    #[test]
    fn render_options_rejects_margins_wider_than_page() {
        let err = RenderOptions::builder()
            .margins(1.0, 1.0, 1.0e7, 1.0e7)
            .build()
            .unwrap_err();
        assert!(matches!(err, Img2DocxError::InvalidRequest(_)));
        assert!(RenderOptions::builder()
            .margins(5.5, 5.5, 1.0, 1.0)
            .build()
            .is_err());
        assert!(RenderOptions::builder()
            .margins(5.0, 5.0, 4.0, 4.0)
            .build()
            .is_ok());
    }

    #[test]
    fn pipeline_parses_codes_and_names() {
        assert_eq!("C".parse::<Pipeline>().unwrap(), Pipeline::Staged);
        assert_eq!("b".parse::<Pipeline>().unwrap(), Pipeline::LayoutParser);
        assert_eq!("direct".parse::<Pipeline>().unwrap(), Pipeline::Direct);
        assert_eq!("".parse::<Pipeline>().unwrap(), Pipeline::Direct);
        assert!("z".parse::<Pipeline>().is_err());
    }

    #[test]
    fn catalog_lookup() {
        assert_eq!(model_catalog().len(), 2);
        assert_eq!(find_model("gemini-2.5-pro").unwrap().name, "Gemini 2.5 Pro");
        assert!(find_model("gemini-1.0").is_none());
    }
}
