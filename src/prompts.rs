//! Prompt templates for VLM-based image-to-HTML transcription.
//!
//! Centralising every prompt here keeps a single source of truth for the
//! built-in wording and lets unit tests inspect prompts without a model.
//!
//! Two templates are user-editable and live on disk in the prompts directory:
//! `base_prompt.txt` (five named fields, see [`PromptOptions`]) and
//! `correction_prompt.txt` (`{correction_instructions}` and
//! `{original_html}`). Both are read once at startup by
//! [`PromptTemplates::load`]; the constants below are used when a file is
//! absent. [`PromptLibrary`] backs the template-management endpoints.

use crate::error::PromptFileError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const BASE_PROMPT_FILE: &str = "base_prompt.txt";
pub const CORRECTION_PROMPT_FILE: &str = "correction_prompt.txt";

/// Default base template. Placeholders: `{signature_handling}`,
/// `{seal_handling}`, `{currency_format}`, `{numbers_format}`,
/// `{general_instructions}`.
pub const DEFAULT_BASE_PROMPT: &str = r#"You are an expert document transcriber. Convert the attached scanned page into a single self-contained HTML document that reproduces its content and structure.

Follow these rules precisely:

1. TEXT PRESERVATION
   - Transcribe ALL text exactly, in the order a human would read the page
   - Keep **bold**, *italic* and underlined emphasis using <strong>, <em> and <u>

2. STRUCTURE
   - Use <h1>–<h3> for titles and section headings
   - Use <p> for paragraphs and <ul>/<ol> for lists
   - Reproduce tables with <table>, <tr>, <th>, <td>; use rowspan and colspan for merged cells

3. SPECIAL ELEMENTS
   - Signatures: {signature_handling}
   - Seals and stamps: {seal_handling}
   - Currency amounts: {currency_format}
   - Numbers: {numbers_format}

4. ADDITIONAL INSTRUCTIONS
   {general_instructions}

5. OUTPUT FORMAT
   - Output ONLY the HTML
   - Do NOT add commentary or explanations"#;

/// Default correction template. Placeholders: `{correction_instructions}`,
/// `{original_html}`.
pub const DEFAULT_CORRECTION_PROMPT: &str = r#"You previously transcribed a scanned document into the HTML below. Revise it according to these instructions and return the complete corrected HTML document.

Correction instructions:
{correction_instructions}

Rules:
- Change only what the instructions ask for; keep every other element, attribute and text as it is
- Output ONLY the HTML, without commentary

Original HTML:
{original_html}"#;

/// Prompt for [`crate::config::Pipeline::Staged`]. Placeholder: `{user_context}`.
pub const STAGED_PROMPT: &str = r#"You are a document conversion engine. Convert the attached document image into a clean, self-contained HTML file.

Your final output must be ONLY the raw HTML code.

Work through three internal stages before answering:

1. Layout. Identify every content block (titles, paragraphs, tables, lists) and fix their reading order.
2. Transcription. Transcribe each block, keeping bold and italic text. Write a handwritten signature as [Signature]. Transcribe the text of a seal prefixed with [Seal].
3. Review. Generate the HTML, then check it against stages 1 and 2: every block present, in reading order, nothing invented or misplaced. Respect these special instructions: {user_context}."#;

/// Prompt for [`crate::config::Pipeline::LayoutParser`]. Placeholder: `{user_context}`.
/// The layout JSON is sent as a second text part.
pub const LAYOUT_PROMPT: &str = r#"You convert the JSON output of a document layout parser into a single self-contained HTML file that reproduces the original document.

Instructions:
1. The full text is in the root `text` field.
2. Walk every entry of `pages`, and within a page its `paragraphs` and `tables`.
3. Paragraphs: take the slice of `text` named by `textAnchor`, and place it using `layout.boundingPoly`.
4. Tables: walk `headerRows` and `bodyRows`; take each cell's text from its `textAnchor`. Emit the cell's `rowSpan` and `colSpan` as `rowspan` and `colspan` attributes.
5. Styles: apply detected emphasis with <strong>, <em> or inline CSS.
6. The text comes from OCR; fix obvious misspellings when the context makes the intended word certain.
7. Respect these special instructions: {user_context}.
8. Output ONLY the raw HTML."#;

// ── Template formatting ──────────────────────────────────────────────────

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Substitute `{name}` placeholders.
///
/// `{{` and `}}` produce literal braces. Placeholders without a matching
/// field are left untouched so user templates containing JSON or CSS still
/// render.
pub fn format_template(template: &str, fields: &[(&str, &str)]) -> String {
    RE_PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match caps.get(1) {
                Some(name) => fields
                    .iter()
                    .find(|(k, _)| *k == name.as_str())
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_else(|| caps[0].to_string()),
                None if &caps[0] == "{{" => "{".to_string(),
                None => "}".to_string(),
            }
        })
        .into_owned()
}

/// The five user-facing fields of the base template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOptions {
    #[serde(default)]
    pub signature_handling: String,
    #[serde(default)]
    pub seal_handling: String,
    #[serde(default)]
    pub currency_format: String,
    #[serde(default)]
    pub numbers_format: String,
    #[serde(default)]
    pub general_instructions: String,
}

impl PromptOptions {
    fn fields(&self) -> [(&str, &str); 5] {
        [
            ("signature_handling", self.signature_handling.as_str()),
            ("seal_handling", self.seal_handling.as_str()),
            ("currency_format", self.currency_format.as_str()),
            ("numbers_format", self.numbers_format.as_str()),
            ("general_instructions", self.general_instructions.as_str()),
        ]
    }
}

/// The two editable templates, read once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub base: String,
    pub correction: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_PROMPT.to_string(),
            correction: DEFAULT_CORRECTION_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Load both templates from `dir`, falling back to the built-in text for
    /// each file that cannot be read.
    pub fn load(dir: &Path) -> Self {
        Self {
            base: read_or_default(&dir.join(BASE_PROMPT_FILE), DEFAULT_BASE_PROMPT),
            correction: read_or_default(
                &dir.join(CORRECTION_PROMPT_FILE),
                DEFAULT_CORRECTION_PROMPT,
            ),
        }
    }

    /// Render the base template with the caller's options.
    pub fn preview(&self, options: &PromptOptions) -> String {
        format_template(&self.base, &options.fields())
    }

    /// Render the correction template.
    pub fn correction_prompt(&self, instructions: &str, original_html: &str) -> String {
        format_template(
            &self.correction,
            &[
                ("correction_instructions", instructions),
                ("original_html", original_html),
            ],
        )
    }
}

fn read_or_default(path: &Path, fallback: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!("Loaded prompt template {}", path.display());
            text
        }
        Err(e) => {
            warn!(
                "Prompt template {} unavailable ({}); using built-in default",
                path.display(),
                e
            );
            fallback.to_string()
        }
    }
}

/// Prompt for the staged pipeline.
pub fn staged_prompt(user_context: &str) -> String {
    format_template(STAGED_PROMPT, &[("user_context", user_context)])
}

/// Prompt for the layout-parser pipeline.
pub fn layout_prompt(user_context: &str) -> String {
    format_template(LAYOUT_PROMPT, &[("user_context", user_context)])
}

// ── Template library (auxiliary endpoints) ───────────────────────────────

static RE_UNSAFE_FILENAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\-]").unwrap());

/// Reduce a requested template name to `[A-Za-z0-9_-]` and append `.txt`.
///
/// `"../../etc/passwd"` becomes `"etcpasswd.txt"`.
pub fn sanitize_prompt_filename(requested: &str) -> Result<String, PromptFileError> {
    let safe = RE_UNSAFE_FILENAME.replace_all(requested, "");
    if safe.is_empty() {
        return Err(PromptFileError::EmptyFilename);
    }
    Ok(format!("{safe}.txt"))
}

/// The prompts directory as seen by the template-management endpoints.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    dir: PathBuf,
}

impl PromptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of every `.txt` file, sorted. A missing directory lists as empty.
    pub async fn list(&self) -> Result<Vec<String>, PromptFileError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".txt") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Content of one template. Names containing `..` or a path separator
    /// are rejected before touching the file system.
    pub async fn load(&self, filename: &str) -> Result<String, PromptFileError> {
        if filename.is_empty()
            || filename.contains("..")
            || filename.contains('/')
            || filename.contains('\\')
        {
            warn!("Rejected prompt load for unsafe name {:?}", filename);
            return Err(PromptFileError::InvalidFilename);
        }
        match tokio::fs::read_to_string(self.dir.join(filename)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PromptFileError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `content` under the sanitised name; returns that name.
    pub async fn save(&self, requested: &str, content: &str) -> Result<String, PromptFileError> {
        let filename = sanitize_prompt_filename(requested)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&filename), content).await?;
        info!("Saved prompt template {}", filename);
        Ok(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_substitutes_known_fields() {
        let out = format_template("Hello {name}, {greeting}!", &[("name", "Ada"), ("greeting", "hi")]);
        assert_eq!(out, "Hello Ada, hi!");
    }

    #[test]
    fn format_handles_escaped_braces_and_unknown_fields() {
        let out = format_template("{{\"a\": {x}}} {missing}", &[("x", "1")]);
        assert_eq!(out, "{\"a\": 1} {missing}");
    }

    #[test]
    fn format_does_not_reexpand_values() {
        let out = format_template("{a}", &[("a", "{b}"), ("b", "nope")]);
        assert_eq!(out, "{b}");
    }

    #[test]
    fn preview_fills_all_five_fields() {
        let templates = PromptTemplates::default();
        let prompt = templates.preview(&PromptOptions {
            signature_handling: "write [Signature]".into(),
            seal_handling: "prefix with [Seal]".into(),
            currency_format: "USD 1,000.00".into(),
            numbers_format: "1,234.56".into(),
            general_instructions: "keep page numbers".into(),
        });
        for needle in [
            "write [Signature]",
            "prefix with [Seal]",
            "USD 1,000.00",
            "1,234.56",
            "keep page numbers",
        ] {
            assert!(prompt.contains(needle), "missing {needle}");
        }
        assert!(!prompt.contains("{signature_handling}"));
    }

    #[test]
    fn correction_prompt_embeds_html_and_instructions() {
        let templates = PromptTemplates::default();
        let prompt = templates.correction_prompt("Fix the date format", "<p>01/02/2024</p>");
        assert!(prompt.contains("Fix the date format"));
        assert!(prompt.contains("<p>01/02/2024</p>"));
    }

    #[test]
    fn pipeline_prompts_embed_context() {
        assert!(staged_prompt("no stamps").contains("no stamps"));
        assert!(layout_prompt("German dates").contains("German dates"));
        assert!(!layout_prompt("x").contains("{user_context}"));
    }

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_prompt_filename("../../etc/passwd").unwrap(), "etcpasswd.txt");
        assert_eq!(sanitize_prompt_filename("my-prompt_v2").unwrap(), "my-prompt_v2.txt");
        assert!(matches!(
            sanitize_prompt_filename("../.."),
            Err(PromptFileError::EmptyFilename)
        ));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(BASE_PROMPT_FILE), "custom {general_instructions}").unwrap();
        let templates = PromptTemplates::load(dir.path());
        assert_eq!(templates.base, "custom {general_instructions}");
        assert_eq!(templates.correction, DEFAULT_CORRECTION_PROMPT);
    }

    #[tokio::test]
    async fn library_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let lib = PromptLibrary::new(dir.path().join("prompts"));

        assert!(lib.list().await.unwrap().is_empty());

        let name = lib.save("../../etc/passwd", "body").await.unwrap();
        assert_eq!(name, "etcpasswd.txt");
        assert!(dir.path().join("prompts").join("etcpasswd.txt").exists());
        assert!(!dir.path().join("etc").exists());

        assert_eq!(lib.list().await.unwrap(), vec!["etcpasswd.txt".to_string()]);
        assert_eq!(lib.load("etcpasswd.txt").await.unwrap(), "body");
    }

    #[tokio::test]
    async fn library_load_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let lib = PromptLibrary::new(dir.path());
        assert!(matches!(
            lib.load("../secret.txt").await,
            Err(PromptFileError::InvalidFilename)
        ));
        assert!(matches!(
            lib.load("sub/file.txt").await,
            Err(PromptFileError::InvalidFilename)
        ));
        assert!(matches!(
            lib.load("absent.txt").await,
            Err(PromptFileError::NotFound)
        ));
    }
}
