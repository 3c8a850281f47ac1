//! Image payload preparation.
//!
//! Work items carry their image as a `data:image/<mime>;base64,<data>` URI.
//! Before any device I/O the payload is decoded, normalized to RGB, resized
//! to the device panel, and re-encoded as JPEG, which is the only format the
//! device-side firmware renders.
//!
//! Every failure here is [`Error::Decode`]; it aborts only the one item.

// ============================================================================
// Imports
// ============================================================================

use std::io::Cursor;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Accepted payload shape: `data:image/<mime>;base64,<data>`.
static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:image/[^;]+;base64,(.+)$").expect("data URI pattern is valid")
});

// ============================================================================
// Decoding
// ============================================================================

/// Extracts the raw encoded image bytes from a data URI.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the URI shape or the base64 payload is
/// malformed. No device I/O has happened at this point.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    if !uri.starts_with("data:") {
        return Err(Error::decode(
            "expected data URI format (data:image/...;base64,...)",
        ));
    }

    let captures = DATA_URI
        .captures(uri)
        .ok_or_else(|| Error::decode("invalid data URI format"))?;

    let bytes = BASE64
        .decode(captures[1].as_bytes())
        .map_err(|e| Error::decode(format!("invalid base64 payload: {e}")))?;

    debug!(bytes = bytes.len(), "Decoded image data");
    Ok(bytes)
}

// ============================================================================
// Preparation
// ============================================================================

/// Converts decoded image bytes into the exact payload the device displays.
///
/// Decodes whatever format the backend produced, converts to RGB, resizes
/// to `width` x `height` with Lanczos3, and re-encodes as JPEG in memory.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the bytes are not a decodable image or the
/// JPEG encode fails.
pub fn prepare_for_device(bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| Error::decode(format!("cannot decode image: {e}")))?;

    debug!(
        width = decoded.width(),
        height = decoded.height(),
        "Decoded source image"
    );

    let resized = DynamicImage::ImageRgb8(decoded.to_rgb8()).resize_exact(
        width,
        height,
        FilterType::Lanczos3,
    );

    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| Error::decode(format!("cannot encode JPEG: {e}")))?;

    let payload = out.into_inner();
    debug!(bytes = payload.len(), width, height, "Prepared device payload");
    Ok(payload)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use image::{ImageBuffer, Rgb};

    /// A tiny valid PNG for round-trip tests.
    fn sample_png() -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(4, 4, |x, y| Rgb([x as u8 * 60, y as u8 * 60, 128]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode sample");
        out.into_inner()
    }

    fn sample_data_uri() -> String {
        format!("data:image/png;base64,{}", BASE64.encode(sample_png()))
    }

    #[test]
    fn test_decode_data_uri_extracts_payload() {
        let bytes = decode_data_uri(&sample_data_uri()).expect("decode");
        assert_eq!(bytes, sample_png());
    }

    #[test]
    fn test_decode_rejects_plain_base64() {
        let err = decode_data_uri("aGVsbG8=").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_non_image_data_uri() {
        let err = decode_data_uri("data:text/plain;base64,aGVsbG8=").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let err = decode_data_uri("data:image/png;base64,!!!not-base64!!!").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_prepare_resizes_to_device_panel() {
        let payload = prepare_for_device(&sample_png(), 320, 480).expect("prepare");

        let shown = image::load_from_memory(&payload).expect("payload decodes");
        assert_eq!(shown.width(), 320);
        assert_eq!(shown.height(), 480);
    }

    #[test]
    fn test_prepare_outputs_jpeg() {
        let payload = prepare_for_device(&sample_png(), 32, 48).expect("prepare");
        assert_eq!(
            image::guess_format(&payload).expect("format"),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_prepare_rejects_garbage() {
        let err = prepare_for_device(b"not an image", 320, 480).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
