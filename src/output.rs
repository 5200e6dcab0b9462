//! Result types returned by a conversion.

use crate::config::Pipeline;
use crate::document::StructuredDocument;
use crate::error::ReferenceError;
use serde::{Deserialize, Serialize};

/// Where the page margins of the output came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MarginSource {
    /// No reference document was supplied.
    Explicit,
    /// Read from the reference document.
    Reference,
    /// A reference document was supplied but could not be used.
    Fallback { reason: ReferenceError },
}

/// Aggregate statistics for one conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Number of model calls made (1 or 2).
    pub model_calls: usize,
    /// Whether the correction pass ran.
    pub corrected: bool,
    /// Whether layout extraction ran before the model call.
    pub layout_extracted: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Top-level blocks in the rendered document.
    pub blocks: usize,
    /// Tables in the rendered document, nested ones included.
    pub tables: usize,
    pub duration_ms: u64,
}

/// The formatted document plus what produced it.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// The final markup that was rendered (after correction, sanitised).
    pub markup: String,
    pub document: StructuredDocument,
    pub pipeline: Pipeline,
    pub model: String,
    pub margins: MarginSource,
    pub stats: ConversionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_source_serialises_with_tag() {
        let json = serde_json::to_value(MarginSource::Fallback {
            reason: ReferenceError::Empty,
        })
        .unwrap();
        assert_eq!(json["source"], "fallback");
        assert_eq!(
            serde_json::to_value(MarginSource::Reference).unwrap()["source"],
            "reference"
        );
    }
}
