//! Post-processing: deterministic formatting rules applied to every rendered
//! document before it is written.
//!
//! ## Why is post-processing necessary?
//!
//! The renderer reproduces what the model wrote, and models format
//! inconsistently: headings of every level, tables that either squeeze or
//! overflow the page, fonts nobody asked for. The output should look the same
//! regardless of which model or pipeline produced it, so a small set of rules
//! normalises the result:
//!
//! 1. Page margins: taken from the reference document when it yields them,
//!    otherwise from the explicit values.
//! 2. Normal style font set to Arial.
//! 3. Every heading paragraph becomes a Normal paragraph with the same runs.
//! 4. Every table gets both autofit flags.
//!
//! Each rule is independently testable and idempotent. Rules 3 and 4 descend
//! into table cells.

use crate::document::{Block, PageMargins, ParagraphStyle, StructuredDocument};
use crate::output::MarginSource;
use crate::pipeline::reference::read_reference_margins;
use tracing::{debug, info, warn};

/// Font family applied to the Normal style.
pub const DEFAULT_FONT: &str = "Arial";

/// Apply every formatting rule in order.
pub fn format_document(
    doc: &mut StructuredDocument,
    reference_docx: Option<&[u8]>,
    explicit: PageMargins,
) -> MarginSource {
    let source = apply_margins(doc, reference_docx, explicit);
    set_default_font(doc, DEFAULT_FONT);
    let flattened = flatten_headings(doc);
    let tables = autosize_tables(doc);
    debug!(
        "Formatted document: {} heading(s) flattened, {} table(s) autosized",
        flattened, tables
    );
    source
}

// ── Rule 1: Margins ─────────────────────────────────────────────────────────

/// Set the section margins and report where they came from.
///
/// A reference document wins when it can be read; any failure to read it is
/// logged and the explicit margins are used instead.
pub fn apply_margins(
    doc: &mut StructuredDocument,
    reference_docx: Option<&[u8]>,
    explicit: PageMargins,
) -> MarginSource {
    let Some(bytes) = reference_docx else {
        doc.section.margins = explicit;
        return MarginSource::Explicit;
    };

    match read_reference_margins(bytes) {
        Ok(found) => {
            doc.section.margins = found.resolve(explicit);
            info!("Using page margins from reference document");
            MarginSource::Reference
        }
        Err(reason) => {
            warn!(
                "Reference document unusable ({}); falling back to explicit margins",
                reason
            );
            doc.section.margins = explicit;
            MarginSource::Fallback { reason }
        }
    }
}

// ── Rule 2: Default font ────────────────────────────────────────────────────

pub fn set_default_font(doc: &mut StructuredDocument, font: &str) {
    doc.styles.normal_font = Some(font.to_string());
}

// ── Rule 3: Flatten headings ────────────────────────────────────────────────

/// Replace every heading paragraph with a Normal paragraph carrying the same
/// runs, in place. Returns the number of paragraphs changed.
///
/// The block list is rebuilt in one pass rather than edited while iterated,
/// so relative order is preserved exactly.
pub fn flatten_headings(doc: &mut StructuredDocument) -> usize {
    let mut changed = 0;
    doc.blocks = flatten_blocks(std::mem::take(&mut doc.blocks), &mut changed);
    changed
}

fn flatten_blocks(blocks: Vec<Block>, changed: &mut usize) -> Vec<Block> {
    blocks
        .into_iter()
        .map(|block| match block {
            Block::Paragraph(mut p) if p.style.is_heading() => {
                p.style = ParagraphStyle::Normal;
                *changed += 1;
                Block::Paragraph(p)
            }
            Block::Table(mut table) => {
                for cell in table.rows.iter_mut().flat_map(|r| r.cells.iter_mut()) {
                    cell.blocks = flatten_blocks(std::mem::take(&mut cell.blocks), changed);
                }
                Block::Table(table)
            }
            other => other,
        })
        .collect()
}

// ── Rule 4: Table autofit ───────────────────────────────────────────────────

/// Enable autofit and fit-to-window on every table. Returns the table count.
pub fn autosize_tables(doc: &mut StructuredDocument) -> usize {
    autosize_blocks(&mut doc.blocks)
}

fn autosize_blocks(blocks: &mut [Block]) -> usize {
    let mut count = 0;
    for block in blocks {
        if let Block::Table(table) = block {
            table.allow_autofit = true;
            table.autofit_to_window = true;
            count += 1;
            for cell in table.rows.iter_mut().flat_map(|r| r.cells.iter_mut()) {
                count += autosize_blocks(&mut cell.blocks);
            }
        }
    }
    count
}
