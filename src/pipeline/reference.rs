//! Reference-document margins: read `w:pgMar` from an uploaded `.docx`.
//!
//! A `.docx` is a zip package; the body lives in `word/document.xml` and
//! the page margins of a section sit in
//! `w:sectPr/w:pgMar[@w:top|@w:bottom|@w:left|@w:right]`, in twips. Only the
//! first section is consulted.
//!
//! Every failure is a [`ReferenceError`]: the caller falls back to the
//! explicit margins and the request continues.

use crate::document::{PageMargins, Section, Twips};
use crate::error::ReferenceError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{Cursor, Read};
use tracing::debug;

const DOCUMENT_PART: &str = "word/document.xml";

/// Margins found in a reference document. A side missing from `w:pgMar`
/// is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceMargins {
    pub top: Option<Twips>,
    pub bottom: Option<Twips>,
    pub left: Option<Twips>,
    pub right: Option<Twips>,
}

impl ReferenceMargins {
    /// Fill missing sides from `explicit`.
    pub fn resolve(&self, explicit: PageMargins) -> PageMargins {
        PageMargins {
            top: self.top.unwrap_or(explicit.top),
            bottom: self.bottom.unwrap_or(explicit.bottom),
            left: self.left.unwrap_or(explicit.left),
            right: self.right.unwrap_or(explicit.right),
        }
    }
}

/// Read the first section's page margins from `.docx` bytes.
pub fn read_reference_margins(bytes: &[u8]) -> Result<ReferenceMargins, ReferenceError> {
    if bytes.is_empty() {
        return Err(ReferenceError::Empty);
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ReferenceError::NotAPackage(e.to_string()))?;

    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| ReferenceError::NotAPackage(format!("{DOCUMENT_PART}: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| ReferenceError::MalformedXml(e.to_string()))?;

    let margins = first_section_margins(&xml)?;
    let zero = PageMargins {
        top: Twips(0),
        bottom: Twips(0),
        left: Twips(0),
        right: Twips(0),
    };
    if !Section::default().fits(&margins.resolve(zero)) {
        return Err(ReferenceError::MarginsTooWide(format!("{margins:?}")));
    }
    debug!("Reference margins: {:?}", margins);
    Ok(margins)
}

fn first_section_margins(xml: &str) -> Result<ReferenceMargins, ReferenceError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut section_depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:sectPr" => section_depth += 1,
            Ok(Event::End(e)) if e.name().as_ref() == b"w:sectPr" => {
                section_depth = section_depth.saturating_sub(1);
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if section_depth > 0 && e.name().as_ref() == b"w:pgMar" =>
            {
                return Ok(ReferenceMargins {
                    top: twips_attr(&e, b"w:top"),
                    bottom: twips_attr(&e, b"w:bottom"),
                    left: twips_attr(&e, b"w:left"),
                    right: twips_attr(&e, b"w:right"),
                });
            }
            Ok(Event::Eof) => return Err(ReferenceError::NoSection),
            Err(e) => {
                return Err(ReferenceError::MalformedXml(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
    }
}

/// Extract an attribute value by key and parse it as twips.
fn twips_attr(e: &BytesStart<'_>, key: &[u8]) -> Option<Twips> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| {
            let value = std::str::from_utf8(&a.value).ok()?.trim().to_string();
            value
                .parse::<i32>()
                .ok()
                .or_else(|| value.parse::<f64>().ok().map(|v| v.round() as i32))
        })
        .map(Twips)
}
