//! Markup rendering: turn model HTML into a [`StructuredDocument`].
//!
//! ## Why a tolerant tree walk?
//!
//! Model output is not guaranteed to be well-formed: unclosed tags, tables
//! without `<tbody>`, stray `</div>`s and full `<html>` documents with
//! `<style>` blocks all occur. `scraper` (html5ever underneath) repairs the
//! markup the way a browser does and never fails, so rendering is a plain
//! walk over the repaired tree. Tags we do not know are treated as inline
//! containers: their text survives, their semantics are dropped.
//!
//! Headings are rendered with `Heading1`–`Heading6` styles here; the
//! post-processor flattens them later.

use crate::document::{
    Alignment, Block, Paragraph, ParagraphStyle, Run, RunFormat, StructuredDocument, Table,
    TableCell, TableRow,
};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use tracing::debug;

/// Render sanitised markup into a document with default section and styles.
pub fn render_html(markup: &str) -> StructuredDocument {
    let html = Html::parse_document(markup);
    let mut builder = BlockBuilder::default();
    builder.walk_children(html.root_element(), &Context::default());
    let blocks = builder.finish();

    debug!(
        "Rendered {} bytes of markup → {} blocks",
        markup.len(),
        blocks.len()
    );

    StructuredDocument {
        blocks,
        ..StructuredDocument::default()
    }
}

// ── Inline context ───────────────────────────────────────────────────────

/// Formatting inherited from ancestors.
#[derive(Debug, Clone, Default)]
struct Context {
    format: RunFormat,
    style: ParagraphStyle,
    alignment: Option<Alignment>,
    preformatted: bool,
}

/// Elements whose content never reaches the document.
const SKIPPED: &[&str] = &[
    "head", "style", "script", "title", "meta", "link", "noscript", "template", "colgroup", "col",
];

/// Elements that start and end a paragraph.
const BLOCKS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "main", "nav", "aside", "address",
    "figure", "figcaption", "center", "form", "fieldset", "dl", "dt", "dd", "body", "html",
];

#[derive(Debug, Clone, Copy)]
struct ListState {
    ordered: bool,
    next: u32,
}

#[derive(Debug, Default)]
struct OpenParagraph {
    paragraph: Paragraph,
    /// Created by `<br>`/`<hr>`; kept even without visible text.
    explicit: bool,
}

#[derive(Debug, Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    current: Option<OpenParagraph>,
    lists: Vec<ListState>,
}

impl BlockBuilder {
    fn finish(mut self) -> Vec<Block> {
        self.flush();
        self.blocks
    }

    fn walk_children(&mut self, element: ElementRef<'_>, ctx: &Context) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.push_text(&text.text, ctx),
                Node::Element(_) => {
                    if let Some(child_element) = ElementRef::wrap(child) {
                        self.visit(child_element, ctx);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit(&mut self, element: ElementRef<'_>, parent: &Context) {
        let name = element.value().name();
        if SKIPPED.contains(&name) {
            return;
        }

        let mut ctx = parent.clone();
        apply_inline_style(element, &mut ctx.format);

        match name {
            "br" => self.push_break(&ctx),
            "hr" => {
                self.flush();
                self.open(&ctx).explicit = true;
                self.flush();
            }
            "img" => {
                if let Some(alt) = element.value().attr("alt").filter(|a| !a.trim().is_empty()) {
                    ctx.format.italic = true;
                    self.push_text(alt, &ctx);
                }
            }
            "b" | "strong" => {
                ctx.format.bold = true;
                self.walk_children(element, &ctx);
            }
            "i" | "em" | "cite" | "var" | "dfn" => {
                ctx.format.italic = true;
                self.walk_children(element, &ctx);
            }
            "u" | "ins" => {
                ctx.format.underline = true;
                self.walk_children(element, &ctx);
            }
            "s" | "strike" | "del" => {
                ctx.format.strike = true;
                self.walk_children(element, &ctx);
            }
            "sup" => {
                ctx.format.superscript = true;
                self.walk_children(element, &ctx);
            }
            "sub" => {
                ctx.format.subscript = true;
                self.walk_children(element, &ctx);
            }
            "code" | "kbd" | "samp" | "tt" => {
                ctx.format.monospace = true;
                self.walk_children(element, &ctx);
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name.as_bytes()[1] - b'0';
                ctx.style = ParagraphStyle::Heading(level);
                self.block(element, ctx);
            }
            "blockquote" => {
                ctx.style = ParagraphStyle::Quote;
                self.block(element, ctx);
            }
            "pre" => {
                ctx.preformatted = true;
                ctx.format.monospace = true;
                self.block(element, ctx);
            }
            "ul" | "ol" => {
                self.flush();
                let start = element
                    .value()
                    .attr("start")
                    .and_then(leading_number)
                    .unwrap_or(1);
                self.lists.push(ListState {
                    ordered: name == "ol",
                    next: start,
                });
                self.walk_children(element, &ctx);
                self.lists.pop();
                self.flush();
            }
            "li" => self.list_item(element, ctx),
            "table" => {
                self.flush();
                self.table(element, &ctx);
            }
            _ if BLOCKS.contains(&name) => {
                if name == "center" {
                    ctx.alignment = Some(Alignment::Center);
                }
                self.block(element, ctx);
            }
            // Unknown or purely inline (span, a, font, label, …): keep the text.
            _ => self.walk_children(element, &ctx),
        }
    }

    /// Flush before and after an element that forms its own paragraph(s).
    fn block(&mut self, element: ElementRef<'_>, mut ctx: Context) {
        if let Some(alignment) = parse_alignment(element) {
            ctx.alignment = Some(alignment);
        }
        self.flush();
        self.walk_children(element, &ctx);
        self.flush();
    }

    fn list_item(&mut self, element: ElementRef<'_>, mut ctx: Context) {
        self.flush();
        let prefix = match self.lists.last_mut() {
            Some(list) if list.ordered => {
                let n = list.next;
                list.next = list.next.saturating_add(1);
                ctx.style = ParagraphStyle::ListNumber;
                format!("{n}. ")
            }
            Some(_) => {
                ctx.style = ParagraphStyle::ListBullet;
                "• ".to_string()
            }
            // `<li>` outside a list: render as a bullet.
            None => {
                ctx.style = ParagraphStyle::ListBullet;
                "• ".to_string()
            }
        };
        if let Some(alignment) = parse_alignment(element) {
            ctx.alignment = Some(alignment);
        }
        let plain = Context {
            format: RunFormat::default(),
            ..ctx.clone()
        };
        self.open(&plain)
            .paragraph
            .runs
            .push(Run::new(prefix, RunFormat::default()));
        self.walk_children(element, &ctx);
        self.flush();
    }

    fn table(&mut self, element: ElementRef<'_>, ctx: &Context) {
        let mut table = Table::default();

        for child in element.children().filter_map(ElementRef::wrap) {
            match child.value().name() {
                "caption" => {
                    let mut caption = Context {
                        alignment: Some(Alignment::Center),
                        ..ctx.clone()
                    };
                    caption.style = ParagraphStyle::Normal;
                    self.block(child, caption);
                }
                "thead" | "tbody" | "tfoot" => {
                    for row in child.children().filter_map(ElementRef::wrap) {
                        if row.value().name() == "tr" {
                            push_row(&mut table, row, ctx);
                        }
                    }
                }
                "tr" => push_row(&mut table, child, ctx),
                _ => {}
            }
        }

        if table.rows.is_empty() {
            debug!("Dropping table without cells");
            return;
        }
        self.blocks.push(Block::Table(table));
    }

    // ── Paragraph assembly ───────────────────────────────────────────────

    fn open(&mut self, ctx: &Context) -> &mut OpenParagraph {
        self.current.get_or_insert_with(|| OpenParagraph {
            paragraph: Paragraph {
                style: ctx.style,
                alignment: ctx.alignment,
                runs: Vec::new(),
            },
            explicit: false,
        })
    }

    fn push_break(&mut self, ctx: &Context) {
        let open = self.open(ctx);
        open.explicit = true;
        open.paragraph.runs.push(Run::new("\n", ctx.format));
    }

    fn push_text(&mut self, raw: &str, ctx: &Context) {
        let cleaned = remove_invisible_chars(raw);
        let text = if ctx.preformatted {
            cleaned.replace("\r\n", "\n")
        } else {
            RE_HTML_WHITESPACE.replace_all(&cleaned, " ").into_owned()
        };
        if text.is_empty() {
            return;
        }

        if !ctx.preformatted {
            let at_line_start = match &self.current {
                None => true,
                Some(open) => open
                    .paragraph
                    .runs
                    .last()
                    .map(|r| r.text.ends_with([' ', '\n']) || r.text.is_empty())
                    .unwrap_or(true),
            };
            let text = if at_line_start {
                text.trim_start_matches(' ')
            } else {
                text.as_str()
            };
            if text.is_empty() {
                return;
            }
            append_run(&mut self.open(ctx).paragraph, text, ctx.format);
        } else {
            append_run(&mut self.open(ctx).paragraph, &text, ctx.format);
        }
    }

    fn flush(&mut self) {
        let Some(OpenParagraph {
            mut paragraph,
            explicit,
        }) = self.current.take()
        else {
            return;
        };

        trim_trailing_spaces(&mut paragraph);
        let has_text = paragraph
            .runs
            .iter()
            .any(|r| !r.text.trim_matches([' ', '\n']).is_empty());
        if has_text || explicit {
            self.blocks.push(Block::Paragraph(paragraph));
        }
    }
}

fn push_row(table: &mut Table, row: ElementRef<'_>, ctx: &Context) {
    let mut out = TableRow::default();
    for cell in row.children().filter_map(ElementRef::wrap) {
        let name = cell.value().name();
        if name != "td" && name != "th" {
            continue;
        }

        let mut cell_ctx = Context {
            style: ParagraphStyle::Normal,
            format: ctx.format,
            ..Context::default()
        };
        cell_ctx.format.bold |= name == "th";
        cell_ctx.alignment = parse_alignment(cell);
        apply_inline_style(cell, &mut cell_ctx.format);

        let mut builder = BlockBuilder::default();
        builder.walk_children(cell, &cell_ctx);
        let mut blocks = builder.finish();
        if blocks.is_empty() {
            blocks.push(Block::Paragraph(Paragraph::new(ParagraphStyle::Normal)));
        }

        let (row_span, col_span) = cell_spans(cell);
        out.cells.push(TableCell {
            row_span,
            col_span,
            blocks,
        });
    }
    if !out.cells.is_empty() {
        table.rows.push(out);
    }
}

/// Largest `colspan` a browser honours.
const MAX_COLSPAN: u32 = 1000;
/// Largest `rowspan` a browser honours.
const MAX_ROWSPAN: u32 = 65534;

/// `(rowspan, colspan)` of a cell; missing, unparsable or zero values are 1,
/// larger values are clamped to the HTML limits.
fn cell_spans(cell: ElementRef<'_>) -> (u32, u32) {
    let span = |attr: &str, max: u32| {
        cell.value()
            .attr(attr)
            .and_then(leading_number)
            .filter(|n| *n > 0)
            .unwrap_or(1)
            .min(max)
    };
    (span("rowspan", MAX_ROWSPAN), span("colspan", MAX_COLSPAN))
}

/// Parse the leading decimal digits of an attribute value (`"2"`, `" 3px"`).
fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

// ── Attribute helpers ────────────────────────────────────────────────────

/// Iterate `name: value` declarations of an inline `style` attribute.
fn style_declarations(element: ElementRef<'_>) -> Vec<(String, String)> {
    element
        .value()
        .attr("style")
        .map(|style| {
            style
                .split(';')
                .filter_map(|decl| decl.split_once(':'))
                .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_ascii_lowercase()))
                .collect()
        })
        .unwrap_or_default()
}

fn apply_inline_style(element: ElementRef<'_>, format: &mut RunFormat) {
    for (key, value) in style_declarations(element) {
        match key.as_str() {
            "font-weight" => {
                format.bold = value == "bold"
                    || value == "bolder"
                    || value.parse::<u32>().map(|w| w >= 600).unwrap_or(false);
            }
            "font-style" => format.italic = value == "italic" || value == "oblique",
            "text-decoration" | "text-decoration-line" => {
                if value.contains("underline") {
                    format.underline = true;
                }
                if value.contains("line-through") {
                    format.strike = true;
                }
            }
            _ => {}
        }
    }
}

fn parse_alignment(element: ElementRef<'_>) -> Option<Alignment> {
    let from_style = style_declarations(element)
        .into_iter()
        .find(|(k, _)| k == "text-align")
        .map(|(_, v)| v);
    let value = from_style.or_else(|| {
        element
            .value()
            .attr("align")
            .map(|a| a.trim().to_ascii_lowercase())
    })?;
    match value.as_str() {
        "left" | "start" => Some(Alignment::Left),
        "center" => Some(Alignment::Center),
        "right" | "end" => Some(Alignment::Right),
        "justify" => Some(Alignment::Justify),
        _ => None,
    }
}

// ── Text helpers ─────────────────────────────────────────────────────────

/// HTML inter-element whitespace (not `\s`, which would eat `&nbsp;`).
static RE_HTML_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\n\r\x0C]+").unwrap());

/// Zero-width space, BOM, soft hyphen, ZWNJ, ZWJ, word joiner.
fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

/// Append text, merging into the previous run when the format matches.
fn append_run(paragraph: &mut Paragraph, text: &str, format: RunFormat) {
    match paragraph.runs.last_mut() {
        Some(last) if last.format == format && last.text != "\n" => last.text.push_str(text),
        _ => paragraph.runs.push(Run::new(text, format)),
    }
}

fn trim_trailing_spaces(paragraph: &mut Paragraph) {
    while let Some(last) = paragraph.runs.last_mut() {
        if last.text == "\n" {
            break;
        }
        let trimmed_len = last.text.trim_end_matches(' ').len();
        last.text.truncate(trimmed_len);
        if last.text.is_empty() {
            paragraph.runs.pop();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraphs(doc: &StructuredDocument) -> Vec<&Paragraph> {
        doc.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph(p) => Some(p),
                Block::Table(_) => None,
            })
            .collect()
    }

    fn only_table(doc: &StructuredDocument) -> &Table {
        let tables = doc.tables();
        assert_eq!(tables.len(), 1, "expected exactly one table");
        tables[0]
    }

    #[test]
    fn paragraphs_in_document_order() {
        let doc = render_html("<p>first</p><div>second</div><p>third</p>");
        let texts: Vec<String> = paragraphs(&doc).iter().map(|p| p.text()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn headings_keep_their_level() {
        let doc = render_html("<h1>Title</h1><h3>Sub</h3><p>Body</p>");
        let styles: Vec<ParagraphStyle> = paragraphs(&doc).iter().map(|p| p.style).collect();
        assert_eq!(
            styles,
            vec![
                ParagraphStyle::Heading(1),
                ParagraphStyle::Heading(3),
                ParagraphStyle::Normal
            ]
        );
    }

    #[test]
    fn inline_emphasis_becomes_runs() {
        let doc = render_html("<p>plain <b>bold</b> <em>italic <strong>both</strong></em></p>");
        let p = paragraphs(&doc)[0];
        assert_eq!(p.text(), "plain bold italic both");
        let bold = p.runs.iter().find(|r| r.text == "bold").unwrap();
        assert!(bold.format.bold && !bold.format.italic);
        let both = p.runs.iter().find(|r| r.text == "both").unwrap();
        assert!(both.format.bold && both.format.italic);
    }

    #[test]
    fn css_styles_map_to_run_format() {
        let doc = render_html(
            r#"<p><span style="font-weight: 700">heavy</span> <span style="font-style:italic; text-decoration: underline">slanted</span></p>"#,
        );
        let p = paragraphs(&doc)[0];
        let heavy = p.runs.iter().find(|r| r.text == "heavy").unwrap();
        assert!(heavy.format.bold);
        let slanted = p.runs.iter().find(|r| r.text == "slanted").unwrap();
        assert!(slanted.format.italic && slanted.format.underline);
    }

    #[test]
    fn whitespace_collapses_outside_pre() {
        let doc = render_html("<p>  a \n\n   b\t c  </p><pre>x\n  y</pre>");
        let ps = paragraphs(&doc);
        assert_eq!(ps[0].text(), "a b c");
        assert_eq!(ps[1].text(), "x\n  y");
        assert!(ps[1].runs[0].format.monospace);
    }

    #[test]
    fn nbsp_paragraph_is_kept() {
        let doc = render_html("<p>\u{a0}</p><p>x</p>");
        assert_eq!(paragraphs(&doc).len(), 2);
    }

    #[test]
    fn empty_paragraphs_are_dropped_but_breaks_kept() {
        let doc = render_html("<p>   </p><p>a<br>b</p><hr>");
        let ps = paragraphs(&doc);
        assert_eq!(ps.len(), 2);
        assert_eq!(ps[0].text(), "a\nb");
        assert!(ps[1].is_empty());
    }

    #[test]
    fn head_style_and_script_are_ignored() {
        let doc = render_html(
            "<html><head><title>T</title><style>p{color:red}</style></head>\
             <body><script>alert(1)</script><p>kept</p></body></html>",
        );
        assert_eq!(doc.plain_text(), "kept");
    }

    #[test]
    fn invisible_characters_are_stripped() {
        let doc = render_html("<p>in\u{200B}voice\u{FEFF}</p>");
        assert_eq!(doc.plain_text(), "invoice");
    }

    #[test]
    fn lists_get_prefixes_and_styles() {
        let doc = render_html("<ul><li>apple</li><li>pear</li></ul><ol start=\"3\"><li>x</li><li>y</li></ol>");
        let ps = paragraphs(&doc);
        assert_eq!(ps[0].text(), "• apple");
        assert_eq!(ps[0].style, ParagraphStyle::ListBullet);
        assert_eq!(ps[2].text(), "3. x");
        assert_eq!(ps[3].text(), "4. y");
        assert_eq!(ps[3].style, ParagraphStyle::ListNumber);

        let doc = render_html(r#"<ol start="4294967295"><li>a</li><li>b</li></ol>"#);
        let ps = paragraphs(&doc);
        assert_eq!(ps[0].text(), "4294967295. a");
        assert_eq!(ps[1].text(), "4294967295. b");
    }

    #[test]
    fn alignment_from_attribute_and_css() {
        let doc = render_html(
            r#"<p align="right">r</p><p style="text-align: center">c</p><center>cc</center>"#,
        );
        let ps = paragraphs(&doc);
        assert_eq!(ps[0].alignment, Some(Alignment::Right));
        assert_eq!(ps[1].alignment, Some(Alignment::Center));
        assert_eq!(ps[2].alignment, Some(Alignment::Center));
    }

    #[test]
    fn table_cells_carry_spans() {
        let doc = render_html(
            r#"<table>
                 <tr><th colspan="2">Header</th><th rowspan="2">Tall</th></tr>
                 <tr><td>a</td><td>b</td></tr>
               </table>"#,
        );
        let table = only_table(&doc);
        assert_eq!(table.rows.len(), 2);
        let header = &table.rows[0].cells;
        assert_eq!((header[0].row_span, header[0].col_span), (1, 2));
        assert_eq!((header[1].row_span, header[1].col_span), (2, 1));
        assert_eq!((table.rows[1].cells[0].row_span, table.rows[1].cells[0].col_span), (1, 1));
        assert_eq!(table.grid_columns(), 3);
    }

    #[test]
    fn header_cells_are_bold() {
        let doc = render_html("<table><tr><th>H</th><td>d</td></tr></table>");
        let row = &only_table(&doc).rows[0];
        let Block::Paragraph(h) = &row.cells[0].blocks[0] else {
            panic!("expected paragraph");
        };
        assert!(h.runs[0].format.bold);
        let Block::Paragraph(d) = &row.cells[1].blocks[0] else {
            panic!("expected paragraph");
        };
        assert!(!d.runs[0].format.bold);
    }

    #[test]
    fn huge_spans_are_clamped() {
        let doc = render_html(
            r#"<table><tr><td colspan="4294967295">a</td><td rowspan="100000000">b</td></tr></table>"#,
        );
        let cells = &only_table(&doc).rows[0].cells;
        assert_eq!(cells[0].col_span, 1000);
        assert_eq!(cells[1].row_span, 65534);
    }

    #[test]
    fn invalid_spans_default_to_one() {
        let doc = render_html(
            r#"<table><tr><td colspan="0">a</td><td rowspan="x">b</td><td colspan="3px">c</td></tr></table>"#,
        );
        let cells = &only_table(&doc).rows[0].cells;
        assert_eq!(cells[0].col_span, 1);
        assert_eq!(cells[1].row_span, 1);
        assert_eq!(cells[2].col_span, 3);
    }

    #[test]
    fn empty_cells_get_a_paragraph() {
        let doc = render_html("<table><tr><td></td><td>x</td></tr></table>");
        let cell = &only_table(&doc).rows[0].cells[0];
        assert_eq!(cell.blocks.len(), 1);
    }

    #[test]
    fn thead_tbody_rows_keep_order_and_text_around_table() {
        let doc = render_html(
            "<p>before</p><table><thead><tr><th>h</th></tr></thead>\
             <tbody><tr><td>1</td></tr><tr><td>2</td></tr></tbody></table><p>after</p>",
        );
        assert!(matches!(doc.blocks[0], Block::Paragraph(_)));
        assert!(matches!(doc.blocks[1], Block::Table(_)));
        assert!(matches!(doc.blocks[2], Block::Paragraph(_)));
        assert_eq!(only_table(&doc).rows.len(), 3);
    }

    #[test]
    fn nested_table_lives_inside_cell() {
        let doc = render_html(
            "<table><tr><td><p>outer</p><table><tr><td>inner</td></tr></table></td></tr></table>",
        );
        assert_eq!(doc.blocks.len(), 1);
        assert_eq!(doc.tables().len(), 2);
    }

    #[test]
    fn malformed_markup_still_renders() {
        let doc = render_html("<p>open <b>bold <i>both</p><div>after</span></div><table><td>x");
        let text = doc.plain_text();
        assert!(text.contains("open bold both"), "got: {text}");
        assert!(text.contains("after"), "got: {text}");
        assert!(text.contains('x'), "got: {text}");
    }

    #[test]
    fn unknown_tags_degrade_to_text() {
        let doc = render_html("<p>total: <money currency=\"EUR\">12,00</money></p><custom-block>free</custom-block>");
        let text = doc.plain_text();
        assert!(text.contains("total: 12,00"), "got: {text}");
        assert!(text.contains("free"), "got: {text}");
    }

    #[test]
    fn empty_markup_gives_empty_document() {
        assert!(render_html("").blocks.is_empty());
        assert!(render_html("   \n ").blocks.is_empty());
    }
}
