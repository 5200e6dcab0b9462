//! Upload encoding: raw bytes → base64 `ImageData` for the multimodal request.
//!
//! VLM APIs (Gemini, OpenAI, Anthropic) accept images as base64 payloads
//! embedded in the JSON request body together with a MIME type. The type the
//! client declared is not trusted: browsers send `application/octet-stream`
//! for dragged files often enough that we sniff the magic bytes first.

use crate::error::Img2DocxError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

const FALLBACK_MIME: &str = "application/octet-stream";

/// A file received from the client or read by the CLI.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    /// MIME type declared by the sender, if any.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            bytes,
        }
    }

    /// MIME type after sniffing, see [`sniff_mime`].
    pub fn mime_type(&self) -> String {
        sniff_mime(&self.bytes, self.content_type.as_deref())
    }
}

/// Determine the MIME type of `bytes`.
///
/// Order: PDF magic, any image format `image` recognises, the declared type,
/// and finally `application/octet-stream`.
pub fn sniff_mime(bytes: &[u8], declared: Option<&str>) -> String {
    if bytes.starts_with(b"%PDF") {
        return "application/pdf".to_string();
    }
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type().to_string();
    }
    declared
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(FALLBACK_MIME)
        .to_string()
}

/// Encode an upload as base64 image data for the model.
pub fn encode_upload(upload: &Upload) -> Result<ImageData, Img2DocxError> {
    if upload.bytes.is_empty() {
        return Err(Img2DocxError::InvalidRequest(format!(
            "uploaded file '{}' is empty",
            upload.filename
        )));
    }

    let mime = upload.mime_type();
    let b64 = STANDARD.encode(&upload.bytes);
    debug!(
        "Encoded {} ({}) → {} bytes base64",
        upload.filename,
        mime,
        b64.len()
    );

    Ok(ImageData::new(b64, mime.as_str()).with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn png_is_sniffed_despite_declared_type() {
        let upload = Upload::new("scan.bin", Some("application/octet-stream".into()), png_bytes());
        let data = encode_upload(&upload).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, upload.bytes);
    }

    #[test]
    fn pdf_magic() {
        assert_eq!(sniff_mime(b"%PDF-1.7\n...", None), "application/pdf");
    }

    #[test]
    fn unknown_bytes_use_declared_then_fallback() {
        assert_eq!(sniff_mime(b"hello", Some("image/tiff")), "image/tiff");
        assert_eq!(sniff_mime(b"hello", Some("  ")), FALLBACK_MIME);
        assert_eq!(sniff_mime(b"hello", None), FALLBACK_MIME);
    }

    #[test]
    fn empty_upload_is_rejected() {
        let err = encode_upload(&Upload::new("empty.png", None, Vec::new())).unwrap_err();
        assert_eq!(err.category(), "invalid_request");
    }
}
