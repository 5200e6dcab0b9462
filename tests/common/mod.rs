//! Shared fixtures: a scripted model that records every call, and helpers
//! to build uploads and reference documents.
#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_img2docx::pipeline::layout::LayoutExtractor;
use edgequake_img2docx::pipeline::llm::{ensure_catalog_model, ModelReply, ModelRequest};
use edgequake_img2docx::{
    write_docx, CallStage, Converter, Img2DocxError, MarkupModel, ModelFactory, PageMargins,
    PromptTemplates, StructuredDocument, Upload,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Answers with canned replies in order and records each request.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ModelRequest>>,
    fail_at: Option<CallStage>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
            fail_at: None,
        })
    }

    /// Fails every request of `stage`.
    pub fn failing_at(replies: &[&str], stage: CallStage) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
            fail_at: Some(stage),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarkupModel for ScriptedModel {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, Img2DocxError> {
        let stage = request.stage;
        self.requests.lock().unwrap().push(request);
        if self.fail_at == Some(stage) {
            return Err(Img2DocxError::ModelCallFailed {
                stage,
                message: "503 Service Unavailable".into(),
            });
        }
        let content = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted model ran out of replies");
        Ok(ModelReply {
            content,
            input_tokens: 1000,
            output_tokens: 200,
        })
    }
}

/// Hands out the same scripted model for every catalog id.
pub struct ScriptedFactory(pub Arc<ScriptedModel>);

impl ModelFactory for ScriptedFactory {
    fn model(&self, model_id: &str) -> Result<Arc<dyn MarkupModel>, Img2DocxError> {
        ensure_catalog_model(model_id)?;
        Ok(self.0.clone())
    }
}

/// Returns fixed layout JSON and counts calls.
pub struct FixedLayout {
    pub json: String,
    pub calls: Mutex<Vec<String>>,
}

impl FixedLayout {
    pub fn new(json: &str) -> Arc<Self> {
        Arc::new(Self {
            json: json.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LayoutExtractor for FixedLayout {
    async fn extract(&self, _bytes: &[u8], mime_type: &str) -> Result<String, Img2DocxError> {
        self.calls.lock().unwrap().push(mime_type.to_string());
        Ok(self.json.clone())
    }
}

pub fn converter(model: Arc<ScriptedModel>) -> Converter {
    Converter::new(
        Arc::new(ScriptedFactory(model)),
        Arc::new(PromptTemplates::default()),
    )
}

/// PNG signature followed by filler; enough for MIME sniffing.
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(&[0u8; 64]);
    bytes
}

pub fn png_upload(name: &str) -> Upload {
    Upload::new(name, Some("image/png".into()), png_bytes())
}

/// A valid `.docx` whose only section has the given margins (inches).
pub fn reference_docx(top: f64, bottom: f64, left: f64, right: f64) -> Vec<u8> {
    let mut doc = StructuredDocument::new();
    doc.section.margins = PageMargins::from_inches(top, bottom, left, right);
    write_docx(&doc).unwrap()
}
