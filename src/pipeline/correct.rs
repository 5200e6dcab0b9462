//! Correction loop: an optional second model pass over the first answer.
//!
//! The pass runs when the caller asked for it *and* supplied instructions.
//! The instruction string is compared exactly against `"None"`: that is what
//! clients send when the instruction box is left untouched, so `"none"` or
//! `" None "` are treated as real instructions.
//!
//! The correction prompt embeds the **raw** first response, fences included,
//! so the model sees exactly what it produced. At most one correction pass
//! runs per request.

use crate::config::NO_CORRECTION;
use crate::error::CallStage;
use crate::error::Img2DocxError;
use crate::pipeline::llm::{MarkupModel, ModelReply, ModelRequest};
use crate::pipeline::sanitize::MarkupDocument;
use crate::prompts::PromptTemplates;
use tracing::info;

/// Whether the correction pass should run.
pub fn needs_correction(requested: bool, instructions: &str) -> bool {
    requested && instructions != NO_CORRECTION
}

/// Ask the model to revise `original` according to `instructions`.
///
/// A failure is fatal for the request ([`CallStage::Correction`]).
pub async fn run_correction(
    model: &dyn MarkupModel,
    templates: &PromptTemplates,
    instructions: &str,
    original: &MarkupDocument,
) -> Result<(MarkupDocument, ModelReply), Img2DocxError> {
    info!(
        "Running correction pass with {} ({} chars of instructions)",
        model.id(),
        instructions.chars().count()
    );
    let prompt = templates.correction_prompt(instructions, original.raw());
    let reply = model
        .generate(ModelRequest::text(CallStage::Correction, prompt))
        .await?;
    Ok((MarkupDocument::new(reply.content.clone()), reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn trigger_requires_flag_and_instructions() {
        assert!(needs_correction(true, "Fix the totals"));
        assert!(!needs_correction(true, "None"));
        assert!(!needs_correction(false, "Fix the totals"));
        assert!(!needs_correction(false, "None"));
    }

    #[test]
    fn sentinel_comparison_is_exact() {
        assert!(needs_correction(true, "none"));
        assert!(needs_correction(true, " None"));
        assert!(needs_correction(true, ""));
    }

    struct Echo {
        seen: Mutex<Vec<ModelRequest>>,
    }

    #[async_trait]
    impl MarkupModel for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        async fn generate(&self, request: ModelRequest) -> Result<ModelReply, Img2DocxError> {
            self.seen.lock().unwrap().push(request);
            Ok(ModelReply {
                content: "```html<p>fixed</p>```".into(),
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    #[test]
    fn correction_prompt_carries_raw_original() {
        let model = Echo {
            seen: Mutex::new(Vec::new()),
        };
        let templates = PromptTemplates::default();
        let original = MarkupDocument::new("```html<p>draft</p>```");

        let (corrected, reply) = tokio_test::block_on(run_correction(
            &model,
            &templates,
            "Use bold totals",
            &original,
        ))
        .unwrap();

        assert_eq!(corrected.sanitized(), "<p>fixed</p>");
        assert_eq!(reply.output_tokens, 5);

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].stage, CallStage::Correction);
        assert!(seen[0].images.is_empty());
        assert!(seen[0].text.contains("Use bold totals"));
        assert!(seen[0].text.contains("```html<p>draft</p>```"));
    }
}
