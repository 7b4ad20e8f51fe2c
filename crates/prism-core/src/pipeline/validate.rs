//! Magic-byte sniffing before full decode.

use image::ImageFormat;

use crate::error::{ItemError, PipelineResult};

/// Identify the source format from its leading bytes.
///
/// Empty or truncated input is corrupt; a recognized container the decoder
/// cannot handle (HEIC, AVIF) or no recognizable signature at all is an
/// unsupported format.
pub fn sniff_format(bytes: &[u8]) -> PipelineResult<ImageFormat> {
    if bytes.is_empty() {
        return Err(ItemError::corrupt("input is empty"));
    }
    if bytes.len() < 4 {
        return Err(ItemError::corrupt("input too small to be an image"));
    }
    let mut header = [0u8; 12];
    let n = bytes.len().min(12);
    header[..n].copy_from_slice(&bytes[..n]);

    if header[0] == 0xFF && header[1] == 0xD8 && header[2] == 0xFF {
        return Ok(ImageFormat::Jpeg);
    }
    if header[..4] == [0x89, b'P', b'N', b'G'] {
        return Ok(ImageFormat::Png);
    }
    if header[..4] == *b"GIF8" {
        return Ok(ImageFormat::Gif);
    }
    if header[..4] == *b"RIFF" {
        if n < 12 {
            return Err(ItemError::corrupt("truncated RIFF header"));
        }
        if header[8..12] == *b"WEBP" {
            return Ok(ImageFormat::WebP);
        }
        return Err(ItemError::UnsupportedFormat {
            format: "riff".to_string(),
        });
    }
    if header[0] == b'B' && header[1] == b'M' {
        return Ok(ImageFormat::Bmp);
    }
    // TIFF: II or MM followed by version 42
    if header[..4] == [b'I', b'I', 0x2A, 0x00] || header[..4] == [b'M', b'M', 0x00, 0x2A] {
        return Ok(ImageFormat::Tiff);
    }
    // ISO-BMFF containers: ftyp box at offset 4
    if n >= 12 && header[4..8] == *b"ftyp" {
        let brand = String::from_utf8_lossy(&header[8..12]).to_ascii_lowercase();
        let format = if brand.starts_with("avi") { "avif" } else { "heic" };
        return Err(ItemError::UnsupportedFormat {
            format: format.to_string(),
        });
    }

    Err(ItemError::UnsupportedFormat {
        format: "unknown".to_string(),
    })
}

/// Lower-case short name of a decoded source format.
pub fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        ImageFormat::Gif => "gif",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Bmp => "bmp",
        _ => "unknown",
    }
}
