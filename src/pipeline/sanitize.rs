//! Markup sanitising: strip the code fence models wrap around their HTML.
//!
//! Even when told to output raw HTML, models regularly answer with
//! ` ```html … ``` `. Only the first fenced block is meaningful; anything
//! before the opening fence or after its closing fence is chatter.
//!
//! ## Missing closing fence
//!
//! When the closing fence is absent the extraction runs to the end of the
//! string. This is long-standing behaviour callers rely on (truncated model
//! output still renders) and it is kept as is; it is logged so truncated
//! responses are visible in diagnostics.

use tracing::{debug, warn};

const HTML_FENCE: &str = "```html";
const FENCE: &str = "```";

/// Which fence, if any, wraps a model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceKind {
    /// No fence marker at all; the text is used verbatim.
    None,
    /// ` ```html ` opening fence.
    Html,
    /// Bare ` ``` ` opening fence (or another language tag).
    Generic,
}

/// Raw text returned by the model for one pass. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupDocument {
    body: String,
}

impl MarkupDocument {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    /// The response exactly as the model produced it.
    pub fn raw(&self) -> &str {
        &self.body
    }

    pub fn fence(&self) -> FenceKind {
        fence_kind(&self.body)
    }

    /// The markup to render, see [`sanitize`].
    pub fn sanitized(&self) -> &str {
        sanitize(&self.body)
    }
}

/// Classify the fence around `text`.
pub fn fence_kind(text: &str) -> FenceKind {
    if text.contains(HTML_FENCE) {
        FenceKind::Html
    } else if text.contains(FENCE) {
        FenceKind::Generic
    } else {
        FenceKind::None
    }
}

/// Return the markup between the first fence pair.
///
/// 1. If ` ```html ` occurs, return what lies between its first occurrence
///    and the next ` ``` `.
/// 2. Otherwise, if ` ``` ` occurs, return what lies between the first and
///    second ` ``` `.
/// 3. Otherwise return `text` unchanged.
///
/// A missing closing fence yields everything to the end of the string.
pub fn sanitize(text: &str) -> &str {
    let marker = match fence_kind(text) {
        FenceKind::None => return text,
        FenceKind::Html => HTML_FENCE,
        FenceKind::Generic => FENCE,
    };

    let Some((_, after_open)) = text.split_once(marker) else {
        return text;
    };

    match after_open.split_once(FENCE) {
        Some((inner, _)) => {
            debug!("Stripped {:?} fence → {} bytes of markup", marker, inner.len());
            inner
        }
        None => {
            warn!(
                "Opening {:?} fence has no closing fence; using the remaining {} bytes",
                marker,
                after_open.len()
            );
            after_open
        }
    }
}
