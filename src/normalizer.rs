// SPDX-License-Identifier: MIT

//! Format normalizer: prepares images for oracle submission
//!
//! The oracle accepts PNG, JPEG and WebP. Anything else that the `image`
//! crate can decode is converted (first frame only) to JPEG in memory, and
//! oversized images are downscaled before submission. The original file on
//! disk is never touched; the converted artifact lives only as long as the
//! returned buffer.

use image::GenericImageView;
use std::path::Path;
use tracing::debug;

use crate::Result;

/// Encodings the oracle accepts as-is.
const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// A classification-ready image payload.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    /// True when the payload differs from the on-disk bytes.
    pub converted: bool,
}

/// Prepare `path` for submission, converting or downscaling when needed.
///
/// Supported encodings within the dimension cap pass through unchanged.
/// Decode or re-encode failure surfaces as an error the caller reports as a
/// non-retryable classification failure for this image.
pub fn prepare(path: &Path, max_dimension: u32) -> Result<PreparedImage> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let supported = SUPPORTED_EXTENSIONS.iter().any(|s| *s == ext);

    if supported {
        // Header-only read to decide whether a downscale pass is needed.
        let (width, height) = image::image_dimensions(path)?;
        if width <= max_dimension && height <= max_dimension {
            let bytes = std::fs::read(path)?;
            return Ok(PreparedImage {
                bytes,
                mime_type: mime_for_extension(&ext),
                converted: false,
            });
        }
        debug!("Downscaling {:?} ({}x{})", path, width, height);
    } else {
        debug!("Converting {:?} (.{}) for submission", path, ext);
    }

    // Decoding an animated format yields its first frame.
    let img = image::open(path)?;
    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(max_dimension, max_dimension, image::imageops::FilterType::Triangle)
    } else {
        img
    };

    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    img.to_rgb8()
        .write_to(&mut cursor, image::ImageFormat::Jpeg)?;

    Ok(PreparedImage {
        bytes: buffer,
        mime_type: "image/jpeg",
        converted: true,
    })
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}
