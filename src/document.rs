//! In-memory document model produced by the renderer and mutated by the
//! post-processor.
//!
//! The model is deliberately small: it holds exactly what the OOXML writer in
//! [`crate::pipeline::docx`] needs and what the formatting rules in
//! [`crate::pipeline::postprocess`] inspect. Block order always matches the
//! order in which elements appeared in the source markup.

use serde::{Deserialize, Serialize};

/// Twentieths of a point, the native length unit of WordprocessingML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Twips(pub i32);

impl Twips {
    pub const PER_INCH: f64 = 1440.0;

    /// Convert inches to twips, rounding to the nearest unit.
    pub fn from_inches(inches: f64) -> Self {
        Twips((inches * Self::PER_INCH).round() as i32)
    }

    pub fn as_inches(self) -> f64 {
        f64::from(self.0) / Self::PER_INCH
    }
}

/// Four page margins of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMargins {
    pub top: Twips,
    pub bottom: Twips,
    pub left: Twips,
    pub right: Twips,
}

impl PageMargins {
    pub fn from_inches(top: f64, bottom: f64, left: f64, right: f64) -> Self {
        Self {
            top: Twips::from_inches(top),
            bottom: Twips::from_inches(bottom),
            left: Twips::from_inches(left),
            right: Twips::from_inches(right),
        }
    }

    /// One inch on every side.
    pub fn one_inch() -> Self {
        Self::from_inches(1.0, 1.0, 1.0, 1.0)
    }
}

impl Default for PageMargins {
    fn default() -> Self {
        Self::one_inch()
    }
}

/// Page-level settings of the (single) output section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub page_width: Twips,
    pub page_height: Twips,
    pub margins: PageMargins,
}

impl Default for Section {
    /// US Letter, one-inch margins.
    fn default() -> Self {
        Self {
            page_width: Twips(12240),
            page_height: Twips(15840),
            margins: PageMargins::default(),
        }
    }
}

impl Section {
    /// Whether `margins` leave a printable area on this page.
    pub fn fits(&self, margins: &PageMargins) -> bool {
        let horizontal = i64::from(margins.left.0) + i64::from(margins.right.0);
        let vertical = i64::from(margins.top.0) + i64::from(margins.bottom.0);
        horizontal < i64::from(self.page_width.0) && vertical < i64::from(self.page_height.0)
    }

    /// Width between the left and right margins.
    pub fn text_width(&self) -> Twips {
        Twips(
            self.page_width
                .0
                .saturating_sub(self.margins.left.0)
                .saturating_sub(self.margins.right.0),
        )
    }
}

/// Document-wide style settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSheet {
    /// Font family of the Normal (body) style. `None` leaves the word
    /// processor's theme font in place.
    pub normal_font: Option<String>,
}

/// Named paragraph style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParagraphStyle {
    /// Body text.
    #[default]
    Normal,
    /// `Heading1` … `Heading6`.
    Heading(u8),
    ListBullet,
    ListNumber,
    Quote,
}

impl ParagraphStyle {
    /// The `w:styleId` written to `w:pStyle`.
    pub fn style_id(self) -> String {
        match self {
            ParagraphStyle::Normal => "Normal".to_string(),
            ParagraphStyle::Heading(level) => format!("Heading{}", level.clamp(1, 6)),
            ParagraphStyle::ListBullet => "ListBullet".to_string(),
            ParagraphStyle::ListNumber => "ListNumber".to_string(),
            ParagraphStyle::Quote => "Quote".to_string(),
        }
    }

    pub fn is_heading(self) -> bool {
        matches!(self, ParagraphStyle::Heading(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alignment {
    Left,
    Center,
    Right,
    Justify,
}

/// Character formatting of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunFormat {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
    pub superscript: bool,
    pub subscript: bool,
    pub monospace: bool,
}

/// A span of uniformly formatted text. `'\n'` inside `text` is a line break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    pub format: RunFormat,
}

impl Run {
    pub fn new(text: impl Into<String>, format: RunFormat) -> Self {
        Self {
            text: text.into(),
            format,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub style: ParagraphStyle,
    pub alignment: Option<Alignment>,
    pub runs: Vec<Run>,
}

impl Paragraph {
    pub fn new(style: ParagraphStyle) -> Self {
        Self {
            style,
            alignment: None,
            runs: Vec::new(),
        }
    }

    /// Concatenated text of every run.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.iter().all(|r| r.text.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    pub row_span: u32,
    pub col_span: u32,
    /// Cell content; never empty once rendered (Word requires a paragraph).
    pub blocks: Vec<Block>,
}

impl Default for TableCell {
    fn default() -> Self {
        Self {
            row_span: 1,
            col_span: 1,
            blocks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<TableRow>,
    /// Let the consuming word processor resize columns to content.
    pub allow_autofit: bool,
    /// Stretch the table to the text width of the page.
    pub autofit_to_window: bool,
}

impl Table {
    /// Number of grid columns once row and column spans are resolved.
    pub fn grid_columns(&self) -> usize {
        crate::pipeline::docx::layout_grid(self).columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Paragraph(Paragraph),
    Table(Table),
}

/// The document that is eventually serialised to `.docx`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredDocument {
    pub blocks: Vec<Block>,
    pub section: Section,
    pub styles: StyleSheet,
}

impl StructuredDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every paragraph in document order, descending into table cells.
    pub fn paragraphs(&self) -> Vec<&Paragraph> {
        let mut out = Vec::new();
        collect_paragraphs(&self.blocks, &mut out);
        out
    }

    /// Every table in document order, including nested tables.
    pub fn tables(&self) -> Vec<&Table> {
        let mut out = Vec::new();
        collect_tables(&self.blocks, &mut out);
        out
    }

    /// Plain text of the whole document, one line per paragraph.
    pub fn plain_text(&self) -> String {
        self.paragraphs()
            .iter()
            .map(|p| p.text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn collect_paragraphs<'a>(blocks: &'a [Block], out: &mut Vec<&'a Paragraph>) {
    for block in blocks {
        match block {
            Block::Paragraph(p) => out.push(p),
            Block::Table(t) => {
                for cell in t.rows.iter().flat_map(|r| &r.cells) {
                    collect_paragraphs(&cell.blocks, out);
                }
            }
        }
    }
}

fn collect_tables<'a>(blocks: &'a [Block], out: &mut Vec<&'a Table>) {
    for block in blocks {
        if let Block::Table(t) = block {
            out.push(t);
            for cell in t.rows.iter().flat_map(|r| &r.cells) {
                collect_tables(&cell.blocks, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twips_from_inches() {
        assert_eq!(Twips::from_inches(1.0), Twips(1440));
        assert_eq!(Twips::from_inches(0.5), Twips(720));
        assert_eq!(Twips::from_inches(1.25), Twips(1800));
        assert!((Twips(2160).as_inches() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn default_section_is_letter_with_inch_margins() {
        let s = Section::default();
        assert_eq!(s.page_width, Twips(12240));
        assert_eq!(s.margins, PageMargins::from_inches(1.0, 1.0, 1.0, 1.0));
    }

    #[test]
    fn heading_style_ids() {
        assert_eq!(ParagraphStyle::Heading(2).style_id(), "Heading2");
        assert_eq!(ParagraphStyle::Heading(9).style_id(), "Heading6");
        assert!(ParagraphStyle::Heading(1).is_heading());
        assert!(!ParagraphStyle::ListBullet.is_heading());
    }

    #[test]
    fn paragraphs_descend_into_cells() {
        let mut inner = Paragraph::new(ParagraphStyle::Heading(3));
        inner.runs.push(Run::new("cell", RunFormat::default()));
        let table = Table {
            rows: vec![TableRow {
                cells: vec![TableCell {
                    blocks: vec![Block::Paragraph(inner)],
                    ..TableCell::default()
                }],
            }],
            ..Table::default()
        };
        let mut outer = Paragraph::new(ParagraphStyle::Normal);
        outer.runs.push(Run::new("body", RunFormat::default()));
        let doc = StructuredDocument {
            blocks: vec![Block::Paragraph(outer), Block::Table(table)],
            ..StructuredDocument::default()
        };
        assert_eq!(doc.paragraphs().len(), 2);
        assert_eq!(doc.tables().len(), 1);
        assert_eq!(doc.plain_text(), "body\ncell");
    }
}
