//! OOXML serialisation: [`StructuredDocument`] → `.docx` bytes.
//!
//! The package itself (content types, relationships, document properties)
//! comes from `docx-rs`; this module maps the document model onto its
//! builders and resolves table spans onto a rectangular grid first, since
//! WordprocessingML expresses `rowspan` as `w:vMerge` placeholders rather
//! than a span count.
//!
//! ## Mapping
//!
//! | Model | OOXML |
//! |-------|-------|
//! | `Section::margins` | `w:sectPr/w:pgMar` |
//! | `StyleSheet::normal_font` | `w:docDefaults` run fonts |
//! | `ParagraphStyle` | `w:pStyle` (`Heading1`…`Heading6`, `ListBullet`, `ListNumber`, `Quote`) |
//! | `Table::allow_autofit` | `w:tblLayout w:type="autofit"` |
//! | `Table::autofit_to_window` | `w:tblW w:type="pct"` at 100% |
//! | `TableCell` spans | `w:gridSpan`, `w:vMerge` |

use crate::document::{
    Alignment, Block, Paragraph, ParagraphStyle, Run, StructuredDocument, Table, TableRow, Twips,
};
use crate::error::Img2DocxError;
use docx_rs::{
    AlignmentType, BreakType, Docx, PageMargin, RunFonts, Style, StyleType, TableLayoutType,
    VMergeType, VertAlignType, WidthType,
};
use std::io::Cursor;
use tracing::debug;

/// MIME type of a `.docx` file.
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const MONOSPACE_FONT: &str = "Courier New";

/// Body text size in half-points (11 pt).
const BODY_SIZE: usize = 22;

/// `w:tblW` value for 100% in fiftieths of a percent.
const FULL_WIDTH_PCT: usize = 5000;

/// Serialise `doc` into a complete `.docx` package.
pub fn write_docx(doc: &StructuredDocument) -> Result<Vec<u8>, Img2DocxError> {
    let section = &doc.section;
    let m = &section.margins;
    let mut docx = Docx::new()
        .page_size(twips_u32(section.page_width), twips_u32(section.page_height))
        .page_margin(
            PageMargin::new()
                .top(m.top.0)
                .bottom(m.bottom.0)
                .left(m.left.0)
                .right(m.right.0)
                .header(720)
                .footer(720)
                .gutter(0),
        )
        .default_size(BODY_SIZE);
    if let Some(font) = doc.styles.normal_font.as_deref() {
        docx = docx.default_fonts(run_fonts(font));
    }
    for style in paragraph_styles() {
        docx = docx.add_style(style);
    }

    let text_width = section.text_width().0.max(Twips::PER_INCH as i32);
    for block in &doc.blocks {
        docx = match block {
            Block::Paragraph(p) => docx.add_paragraph(docx_paragraph(p)),
            Block::Table(t) => match docx_table(t, text_width) {
                Some(table) => docx.add_table(table),
                None => docx,
            },
        };
    }
    if matches!(doc.blocks.last(), Some(Block::Table(_))) {
        docx = docx.add_paragraph(docx_rs::Paragraph::new());
    }

    let mut cursor = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut cursor)
        .map_err(|e| Img2DocxError::PackageWrite(e.to_string()))?;
    let bytes = cursor.into_inner();

    debug!(
        "Wrote .docx package: {} blocks → {} bytes",
        doc.blocks.len(),
        bytes.len()
    );
    Ok(bytes)
}

fn twips_u32(t: Twips) -> u32 {
    u32::try_from(t.0).unwrap_or(0)
}

fn run_fonts(family: &str) -> RunFonts {
    RunFonts::new()
        .ascii(family)
        .hi_ansi(family)
        .east_asia(family)
        .cs(family)
}

// ── Table grid ───────────────────────────────────────────────────────────

/// Vertical-merge role of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VMerge {
    /// First cell of a `rowspan` > 1.
    Restart,
    /// Placeholder covered by a `rowspan` from an earlier row.
    Continue,
}

/// One cell position in a resolved row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
    /// Index into the source row's cells; `None` for merge placeholders and
    /// padding.
    pub source: Option<usize>,
    pub column: usize,
    pub span: usize,
    pub vmerge: Option<VMerge>,
}

/// A table with row and column spans resolved onto a rectangular grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridLayout {
    pub columns: usize,
    pub rows: Vec<Vec<GridCell>>,
}

/// A pending `rowspan` from an earlier row.
#[derive(Debug, Clone, Copy)]
struct Carry {
    column: usize,
    span: usize,
    remaining: u32,
}

/// Resolve spans. Rows shorter than the widest row are padded with an empty
/// cell; a cell overlapping a pending `rowspan` ends that merge.
pub fn layout_grid(table: &Table) -> GridLayout {
    let mut pending: Vec<Carry> = Vec::new();
    let mut rows = Vec::with_capacity(table.rows.len());

    for row in &table.rows {
        let mut carried = std::mem::take(&mut pending);
        carried.sort_by_key(|c| c.column);
        let mut carried = carried.into_iter().peekable();
        let mut out: Vec<GridCell> = Vec::new();
        let mut column = 0usize;

        for (index, cell) in row.cells.iter().enumerate() {
            while let Some(carry) = carried.next_if(|c| c.column <= column) {
                if carry.column == column {
                    push_continuation(&mut out, &mut pending, &mut column, carry);
                }
            }

            let span = cell.col_span.max(1) as usize;
            while carried.next_if(|c| c.column < column + span).is_some() {}

            let restart = cell.row_span > 1;
            out.push(GridCell {
                source: Some(index),
                column,
                span,
                vmerge: restart.then_some(VMerge::Restart),
            });
            if restart {
                pending.push(Carry {
                    column,
                    span,
                    remaining: cell.row_span - 1,
                });
            }
            column += span;
        }

        for carry in carried {
            if carry.column < column {
                continue;
            }
            if carry.column > column {
                out.push(GridCell {
                    source: None,
                    column,
                    span: carry.column - column,
                    vmerge: None,
                });
                column = carry.column;
            }
            push_continuation(&mut out, &mut pending, &mut column, carry);
        }

        rows.push(out);
    }

    let columns = rows
        .iter()
        .map(|r| r.iter().map(|c| c.span).sum::<usize>())
        .max()
        .unwrap_or(0);

    for row in &mut rows {
        let width: usize = row.iter().map(|c| c.span).sum();
        if width < columns {
            row.push(GridCell {
                source: None,
                column: width,
                span: columns - width,
                vmerge: None,
            });
        }
    }

    GridLayout { columns, rows }
}

fn push_continuation(
    out: &mut Vec<GridCell>,
    pending: &mut Vec<Carry>,
    column: &mut usize,
    carry: Carry,
) {
    out.push(GridCell {
        source: None,
        column: *column,
        span: carry.span,
        vmerge: Some(VMerge::Continue),
    });
    *column += carry.span;
    if carry.remaining > 1 {
        pending.push(Carry {
            remaining: carry.remaining - 1,
            ..carry
        });
    }
}


// ── Blocks ───────────────────────────────────────────────────────────────

fn docx_paragraph(p: &Paragraph) -> docx_rs::Paragraph {
    let mut out = docx_rs::Paragraph::new();
    if p.style != ParagraphStyle::Normal {
        out = out.style(&p.style.style_id());
    }
    if let Some(alignment) = p.alignment {
        out = out.align(justification(alignment));
    }
    for run in p.runs.iter().filter(|r| !r.text.is_empty()) {
        out = out.add_run(docx_run(run));
    }
    out
}

fn justification(alignment: Alignment) -> AlignmentType {
    match alignment {
        Alignment::Left => AlignmentType::Left,
        Alignment::Center => AlignmentType::Center,
        Alignment::Right => AlignmentType::Right,
        Alignment::Justify => AlignmentType::Both,
    }
}

fn docx_run(run: &Run) -> docx_rs::Run {
    let f = &run.format;
    let mut out = docx_rs::Run::new();
    if f.monospace {
        out = out.fonts(run_fonts(MONOSPACE_FONT));
    }
    if f.bold {
        out = out.bold();
    }
    if f.italic {
        out = out.italic();
    }
    if f.strike {
        out = out.strike();
    }
    if f.underline {
        out = out.underline("single");
    }
    if f.superscript {
        out.run_property = out.run_property.vert_align(VertAlignType::SuperScript);
    } else if f.subscript {
        out.run_property = out.run_property.vert_align(VertAlignType::SubScript);
    }

    let text = xml_safe(&run.text);
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out = out.add_break(BreakType::TextWrapping);
        }
        for (j, piece) in line.split('\t').enumerate() {
            if j > 0 {
                out = out.add_tab();
            }
            if !piece.is_empty() {
                out = out.add_text(piece);
            }
        }
    }
    out
}

/// Drop characters XML 1.0 cannot carry.
fn xml_safe(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            matches!(c, '\t' | '\n')
                || (c >= '\u{20}' && c != '\u{FFFE}' && c != '\u{FFFF}')
        })
        .collect()
}

/// `None` for a table without cells.
fn docx_table(table: &Table, width: i32) -> Option<docx_rs::Table> {
    let grid = layout_grid(table);
    let columns = i32::try_from(grid.columns).ok().filter(|c| *c > 0)?;
    let col_width = usize::try_from(width / columns).unwrap_or(0).max(1);

    let rows = table
        .rows
        .iter()
        .zip(&grid.rows)
        .map(|(row, cells)| {
            docx_rs::TableRow::new(
                cells
                    .iter()
                    .map(|cell| docx_cell(table, row, cell, col_width))
                    .collect(),
            )
        })
        .collect();

    let mut out = docx_rs::Table::new(rows).set_grid(vec![col_width; grid.columns]);
    out = if table.autofit_to_window {
        out.width(FULL_WIDTH_PCT, WidthType::Pct)
    } else if table.allow_autofit {
        out.width(0, WidthType::Auto)
    } else {
        out.width(col_width * grid.columns, WidthType::Dxa)
    };
    Some(out.layout(if table.allow_autofit {
        TableLayoutType::Autofit
    } else {
        TableLayoutType::Fixed
    }))
}

fn docx_cell(
    table: &Table,
    row: &TableRow,
    cell: &GridCell,
    col_width: usize,
) -> docx_rs::TableCell {
    let cell_width = col_width.saturating_mul(cell.span);
    let mut out = docx_rs::TableCell::new();
    out = if table.allow_autofit {
        out.width(0, WidthType::Auto)
    } else {
        out.width(cell_width, WidthType::Dxa)
    };
    if cell.span > 1 {
        out = out.grid_span(cell.span);
    }
    match cell.vmerge {
        Some(VMerge::Restart) => out = out.vertical_merge(VMergeType::Restart),
        Some(VMerge::Continue) => out = out.vertical_merge(VMergeType::Continue),
        None => {}
    }

    let blocks = cell
        .source
        .and_then(|i| row.cells.get(i))
        .map(|c| c.blocks.as_slice())
        .unwrap_or(&[]);
    let inner_width = i32::try_from(cell_width).unwrap_or(i32::MAX);
    for block in blocks {
        out = match block {
            Block::Paragraph(p) => out.add_paragraph(docx_paragraph(p)),
            Block::Table(t) => match docx_table(t, inner_width) {
                Some(nested) => out.add_table(nested),
                None => out,
            },
        };
    }
    // A cell must end with a paragraph.
    if !matches!(blocks.last(), Some(Block::Paragraph(_))) {
        out = out.add_paragraph(docx_rs::Paragraph::new());
    }
    out
}

// ── Styles ───────────────────────────────────────────────────────────────

/// `(level, half-point size)` of the heading styles.
const HEADING_SIZES: [(u8, usize); 6] = [(1, 32), (2, 26), (3, 24), (4, 22), (5, 22), (6, 22)];

/// Paragraph styles referenced by `w:pStyle`. Headings exist so documents
/// that skip flattening still resolve their styles.
fn paragraph_styles() -> Vec<Style> {
    let mut styles: Vec<Style> = HEADING_SIZES
        .iter()
        .map(|&(level, size)| {
            Style::new(format!("Heading{level}"), StyleType::Paragraph)
                .name(format!("heading {level}"))
                .based_on("Normal")
                .bold()
                .size(size)
        })
        .collect();
    styles.push(
        Style::new("ListBullet", StyleType::Paragraph)
            .name("List Bullet")
            .based_on("Normal"),
    );
    styles.push(
        Style::new("ListNumber", StyleType::Paragraph)
            .name("List Number")
            .based_on("Normal"),
    );
    styles.push(
        Style::new("Quote", StyleType::Paragraph)
            .name("Quote")
            .based_on("Normal")
            .italic(),
    );
    styles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PageMargins, RunFormat, TableCell};
    use crate::pipeline::reference::read_reference_margins;
    use std::io::Read;

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    fn cell(text: &str, row_span: u32, col_span: u32) -> TableCell {
        let mut p = Paragraph::new(ParagraphStyle::Normal);
        p.runs.push(Run::new(text, RunFormat::default()));
        TableCell {
            row_span,
            col_span,
            blocks: vec![Block::Paragraph(p)],
        }
    }

    fn table(rows: Vec<Vec<TableCell>>) -> Table {
        Table {
            rows: rows.into_iter().map(|cells| TableRow { cells }).collect(),
            ..Table::default()
        }
    }

    fn para(text: &str) -> Block {
        let mut p = Paragraph::new(ParagraphStyle::Normal);
        p.runs.push(Run::new(text, RunFormat::default()));
        Block::Paragraph(p)
    }

    fn document_xml(doc: &StructuredDocument) -> String {
        read_part(&write_docx(doc).unwrap(), "word/document.xml")
    }

    #[test]
    fn package_has_every_part() {
        let doc = StructuredDocument {
            blocks: vec![para("hello")],
            ..StructuredDocument::default()
        };
        let bytes = write_docx(&doc).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "word/document.xml",
            "word/styles.xml",
            "word/settings.xml",
            "word/_rels/document.xml.rels",
            "docProps/core.xml",
            "docProps/app.xml",
        ] {
            assert!(names.contains(&part), "missing {part}");
        }
        assert!(read_part(&bytes, "word/document.xml").contains("hello"));
    }

    #[test]
    fn margins_round_trip_through_reference_reader() {
        let mut doc = StructuredDocument::new();
        doc.section.margins = PageMargins::from_inches(0.5, 0.75, 1.25, 2.0);
        let bytes = write_docx(&doc).unwrap();
        let m = read_reference_margins(&bytes).unwrap();
        assert_eq!(m.resolve(PageMargins::one_inch()), doc.section.margins);
    }

    #[test]
    fn oversized_margins_do_not_panic() {
        let mut doc = StructuredDocument {
            blocks: vec![Block::Table(table(vec![vec![cell("a", 1, 1)]]))],
            ..StructuredDocument::default()
        };
        doc.section.margins = PageMargins::from_inches(1.0, 1.0, 1.0e7, 1.0e7);
        assert!(write_docx(&doc).is_ok());
    }

    #[test]
    fn text_is_escaped_and_breaks_emitted() {
        let mut p = Paragraph::new(ParagraphStyle::Normal);
        p.runs.push(Run::new("a < b & c\nnext\u{1}", RunFormat::default()));
        let xml = document_xml(&StructuredDocument {
            blocks: vec![Block::Paragraph(p)],
            ..StructuredDocument::default()
        });
        assert!(xml.contains("a &lt; b &amp; c"));
        assert!(xml.contains("<w:br "));
        assert!(xml.contains("next"));
        assert!(!xml.contains('\u{1}'));
    }

    #[test]
    fn run_properties_follow_format() {
        let mut p = Paragraph::new(ParagraphStyle::Heading(2));
        p.alignment = Some(Alignment::Justify);
        p.runs.push(Run::new(
            "x",
            RunFormat {
                bold: true,
                italic: true,
                superscript: true,
                ..RunFormat::default()
            },
        ));
        let xml = document_xml(&StructuredDocument {
            blocks: vec![Block::Paragraph(p)],
            ..StructuredDocument::default()
        });
        assert!(xml.contains(r#"w:pStyle w:val="Heading2""#));
        assert!(xml.contains(r#"w:jc w:val="both""#));
        assert!(xml.contains("<w:b />") || xml.contains("<w:b/>"));
        assert!(xml.contains("<w:i />") || xml.contains("<w:i/>"));
        assert!(xml.contains(r#"w:vertAlign w:val="superscript""#));
    }

    #[test]
    fn normal_font_lands_in_styles() {
        let mut doc = StructuredDocument::new();
        doc.styles.normal_font = Some("Arial".into());
        let styles = read_part(&write_docx(&doc).unwrap(), "word/styles.xml");
        assert!(styles.contains(r#"w:ascii="Arial""#));
        assert!(styles.contains(r#"w:styleId="Heading6""#));
    }

    #[test]
    fn grid_resolves_colspan_and_rowspan() {
        let t = table(vec![
            vec![cell("A", 2, 1), cell("B", 1, 2)],
            vec![cell("C", 1, 1), cell("D", 1, 1)],
        ]);
        let grid = layout_grid(&t);
        assert_eq!(grid.columns, 3);
        assert_eq!(grid.rows[0][0].vmerge, Some(VMerge::Restart));
        assert_eq!(grid.rows[0][1].span, 2);
        let second = &grid.rows[1];
        assert_eq!(second[0].vmerge, Some(VMerge::Continue));
        assert_eq!(second[0].source, None);
        assert_eq!((second[1].source, second[1].column), (Some(0), 1));
        assert_eq!((second[2].source, second[2].column), (Some(1), 2));
    }

    #[test]
    fn grid_rowspan_in_middle_column() {
        let t = table(vec![
            vec![cell("a", 1, 1), cell("tall", 3, 1), cell("c", 1, 1)],
            vec![cell("d", 1, 1), cell("e", 1, 1)],
            vec![cell("f", 1, 1), cell("g", 1, 1)],
        ]);
        let grid = layout_grid(&t);
        assert_eq!(grid.columns, 3);
        for row in &grid.rows[1..] {
            assert_eq!(row.len(), 3);
            assert_eq!(row[1].vmerge, Some(VMerge::Continue));
            assert_eq!(row[2].source, Some(1));
        }
    }

    #[test]
    fn short_rows_are_padded() {
        let t = table(vec![
            vec![cell("a", 1, 1), cell("b", 1, 1), cell("c", 1, 1)],
            vec![cell("d", 1, 1)],
        ]);
        let grid = layout_grid(&t);
        let widths: Vec<usize> = grid
            .rows
            .iter()
            .map(|r| r.iter().map(|c| c.span).sum())
            .collect();
        assert_eq!(widths, vec![3, 3]);
    }

    #[test]
    fn autofit_flags_select_table_layout() {
        let mut t = table(vec![vec![cell("a", 1, 1)]]);
        let xml = document_xml(&StructuredDocument {
            blocks: vec![Block::Table(t.clone())],
            ..StructuredDocument::default()
        });
        assert!(xml.contains(r#"w:tblLayout w:type="fixed""#));

        t.allow_autofit = true;
        t.autofit_to_window = true;
        let xml = document_xml(&StructuredDocument {
            blocks: vec![Block::Table(t)],
            ..StructuredDocument::default()
        });
        assert!(xml.contains(r#"w:tblLayout w:type="autofit""#));
        assert!(xml.contains(r#"w:type="pct""#));
        // Trailing paragraph after a final table.
        let tail = &xml[xml.rfind("</w:tbl>").unwrap()..];
        assert!(tail.contains("<w:p>") || tail.contains("<w:p "));
    }

    #[test]
    fn merged_cells_are_written() {
        let t = table(vec![
            vec![cell("A", 2, 2), cell("B", 1, 1)],
            vec![cell("C", 1, 1)],
        ]);
        let xml = document_xml(&StructuredDocument {
            blocks: vec![Block::Table(t)],
            ..StructuredDocument::default()
        });
        assert_eq!(xml.matches(r#"w:gridSpan w:val="2""#).count(), 2);
        assert!(xml.contains(r#"w:vMerge w:val="restart""#));
        assert!(xml.contains(r#"w:vMerge w:val="continue""#));
        assert_eq!(xml.matches("<w:gridCol ").count(), 3);
    }

    #[test]
    fn huge_colspan_from_markup_is_written() {
        let (doc, _) = crate::convert::render_markup_document(
            r#"<table><tr><td colspan="4294967295">a</td><td>b</td></tr></table>"#,
            None,
            PageMargins::one_inch(),
        );
        let xml = document_xml(&doc);
        assert_eq!(xml.matches("<w:gridCol ").count(), 1001);
    }

    #[test]
    fn empty_table_is_skipped() {
        let xml = document_xml(&StructuredDocument {
            blocks: vec![Block::Table(Table::default()), para("after")],
            ..StructuredDocument::default()
        });
        assert!(!xml.contains("<w:tbl>"));
        assert!(xml.contains("after"));
    }
}
