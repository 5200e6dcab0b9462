//! VLM interaction: build multimodal messages and call the provider.
//!
//! Everything the conversion needs from a model is one operation: send an
//! optional system prompt, a user text and zero or more images; get text
//! back. [`MarkupModel`] captures exactly that, and [`ModelFactory`] turns a
//! catalog model id into a ready model. The production implementations wrap
//! an `edgequake_llm` provider; tests substitute scripted models so call
//! counts and prompts can be asserted without network access.
//!
//! All prompt wording lives in [`crate::prompts`].
//!
//! ## No retries
//!
//! A failed call fails the request. Correction and layout prompts are long
//! and expensive; a client that wants another attempt simply re-submits.

use crate::config::{find_model, model_catalog, ServiceConfig};
use crate::error::{CallStage, Img2DocxError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// One model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub stage: CallStage,
    pub system: Option<String>,
    pub text: String,
    pub images: Vec<ImageData>,
}

impl ModelRequest {
    /// A text-only request.
    pub fn text(stage: CallStage, text: impl Into<String>) -> Self {
        Self {
            stage,
            system: None,
            text: text.into(),
            images: Vec::new(),
        }
    }

    /// A request carrying one image followed by `text`.
    pub fn with_image(stage: CallStage, image: ImageData, text: impl Into<String>) -> Self {
        Self {
            stage,
            system: None,
            text: text.into(),
            images: vec![image],
        }
    }

    /// Send `system` as a separate system message ahead of the user text.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// What the model returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A generative model that answers with (HTML) text.
#[async_trait]
pub trait MarkupModel: Send + Sync {
    /// Catalog id of the model.
    fn id(&self) -> &str;

    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, Img2DocxError>;
}

/// Produces a [`MarkupModel`] for a catalog id.
pub trait ModelFactory: Send + Sync {
    fn model(&self, model_id: &str) -> Result<Arc<dyn MarkupModel>, Img2DocxError>;
}

// ── Provider-backed implementation ───────────────────────────────────────

/// A [`MarkupModel`] backed by an `edgequake_llm` provider.
pub struct ProviderModel {
    id: String,
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl ProviderModel {
    pub fn new(
        id: impl Into<String>,
        provider: Arc<dyn LLMProvider>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            id: id.into(),
            provider,
            options: build_options(temperature, max_tokens),
        }
    }
}

#[async_trait]
impl MarkupModel for ProviderModel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, Img2DocxError> {
        let start = Instant::now();
        let stage = request.stage;
        let messages = build_messages(request);

        match self.provider.chat(&messages, Some(&self.options)).await {
            Ok(response) => {
                debug!(
                    "{} call to {}: {} input tokens, {} output tokens, {:?}",
                    stage,
                    self.id,
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                Ok(ModelReply {
                    content: response.content,
                    input_tokens: response.prompt_tokens,
                    output_tokens: response.completion_tokens,
                })
            }
            Err(e) => {
                warn!("{} call to {} failed: {}", stage, self.id, e);
                Err(Img2DocxError::ModelCallFailed {
                    stage,
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Message layout: optional system message, then one user message with the
/// text and any images attached.
fn build_messages(request: ModelRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system.as_deref() {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user_with_images(
        request.text.as_str(),
        request.images,
    ));
    messages
}

fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

/// Creates provider-backed models through [`ProviderFactory`].
///
/// A provider is created per request for the chosen model; the provider name
/// and sampling settings come from [`ServiceConfig`].
#[derive(Debug, Clone)]
pub struct LlmModelFactory {
    provider_name: String,
    temperature: f32,
    max_tokens: usize,
}

impl LlmModelFactory {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            provider_name: config.provider.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

impl ModelFactory for LlmModelFactory {
    fn model(&self, model_id: &str) -> Result<Arc<dyn MarkupModel>, Img2DocxError> {
        ensure_catalog_model(model_id)?;
        let provider = ProviderFactory::create_llm_provider(&self.provider_name, model_id)
            .map_err(|e| Img2DocxError::ProviderNotConfigured {
                provider: self.provider_name.clone(),
                hint: format!("{e}"),
            })?;
        Ok(Arc::new(ProviderModel::new(
            model_id,
            provider,
            self.temperature,
            self.max_tokens,
        )))
    }
}

/// Reject ids that are not in the model catalog.
pub fn ensure_catalog_model(model_id: &str) -> Result<(), Img2DocxError> {
    if find_model(model_id).is_some() {
        return Ok(());
    }
    Err(Img2DocxError::UnknownModel {
        model: model_id.to_string(),
        available: model_catalog()
            .iter()
            .map(|m| m.id.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_from_config() {
        let config = ServiceConfig::default();
        let opts = build_options(config.temperature, config.max_tokens);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    #[test]
    fn messages_put_system_first() {
        let request =
            ModelRequest::text(CallStage::Transcription, "{}").with_system("be precise");
        let messages = build_messages(request);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn text_request_has_no_images() {
        let request = ModelRequest::text(CallStage::Transcription, "hello");
        assert!(request.images.is_empty());
        assert_eq!(build_messages(request).len(), 1);
    }

    #[test]
    fn unknown_model_is_rejected_before_provider_creation() {
        let factory = LlmModelFactory::new(&ServiceConfig::default());
        let err = factory.model("gpt-9").err().unwrap();
        assert!(matches!(err, Img2DocxError::UnknownModel { .. }));
        assert!(err.to_string().contains("gemini-2.5-flash"));
    }
}
