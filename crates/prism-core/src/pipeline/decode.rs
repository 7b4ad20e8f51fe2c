//! Decode stage: format detection, limits, and EXIF orientation.

use exif::{In, Reader, Tag};
use image::ImageReader;
use std::io::Cursor;

use super::stage::{Frame, Stage};
use super::validate::{format_name, sniff_format};
use crate::config::LimitsConfig;
use crate::error::{ItemError, PipelineResult};
use crate::transform::TransformDescriptor;

/// Decodes source bytes into the working image.
pub struct DecodeStage {
    max_dimension: u32,
    max_file_bytes: u64,
}

impl DecodeStage {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            max_dimension: limits.max_image_dimension,
            max_file_bytes: limits.max_file_size_mb * 1024 * 1024,
        }
    }
}

impl Stage for DecodeStage {
    fn name(&self) -> &'static str {
        "decode"
    }

    fn progress_weight(&self) -> u32 {
        3
    }

    fn apply(&self, mut frame: Frame, _descriptor: &TransformDescriptor) -> PipelineResult<Frame> {
        let size = frame.source.len() as u64;
        if size > self.max_file_bytes {
            return Err(ItemError::FileTooLarge {
                size_mb: size / (1024 * 1024),
                max_mb: self.max_file_bytes / (1024 * 1024),
            });
        }

        let format = sniff_format(&frame.source)?;

        // Header-only read, so oversized images are rejected before allocation
        let (width, height) = ImageReader::with_format(Cursor::new(&frame.source), format)
            .into_dimensions()
            .map_err(|e| ItemError::corrupt(format!("cannot read {} header: {e}", format_name(format))))?;
        if width > self.max_dimension || height > self.max_dimension {
            return Err(ItemError::DimensionTooLarge {
                width,
                height,
                max_dim: self.max_dimension,
            });
        }

        let image = ImageReader::with_format(Cursor::new(&frame.source), format)
            .decode()
            .map_err(|e| ItemError::corrupt(e.to_string()))?;

        frame.orientation = read_orientation(&frame.source);
        frame.source_format = Some(format);
        frame.original_dimensions = (width, height);
        frame.image = Some(image);
        Ok(frame)
    }

    fn timeout_error(&self, timeout_ms: u64) -> ItemError {
        ItemError::corrupt(format!("decode did not finish within {timeout_ms}ms"))
    }
}

/// EXIF orientation tag, or 1 when absent or unreadable.
pub fn read_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let Ok(exif) = Reader::new().read_from_container(&mut cursor) else {
        return 1;
    };
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .filter(|o| (1..=8).contains(o))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{descriptor, png_bytes};

    fn stage() -> DecodeStage {
        DecodeStage::new(&LimitsConfig::default())
    }

    #[test]
    fn test_decode_png() {
        let frame = stage()
            .apply(Frame::new(png_bytes(40, 20)), &descriptor(&[]))
            .unwrap();
        assert_eq!(frame.original_dimensions, (40, 20));
        assert_eq!(frame.source_format, Some(image::ImageFormat::Png));
        assert_eq!(frame.orientation, 1);
        assert!(frame.image.is_some());
    }

    #[test]
    fn test_zero_byte_input_is_corrupt() {
        let err = stage().apply(Frame::new(Vec::new()), &descriptor(&[])).unwrap_err();
        assert_eq!(err.kind(), "CorruptInput");
    }

    #[test]
    fn test_truncated_png_is_corrupt() {
        let mut bytes = png_bytes(64, 64);
        bytes.truncate(bytes.len() / 2);
        let err = stage().apply(Frame::new(bytes), &descriptor(&[])).unwrap_err();
        assert_eq!(err.kind(), "CorruptInput");
    }

    #[test]
    fn test_dimension_limit() {
        let limits = LimitsConfig {
            max_image_dimension: 32,
            ..Default::default()
        };
        let err = DecodeStage::new(&limits)
            .apply(Frame::new(png_bytes(33, 8)), &descriptor(&[]))
            .unwrap_err();
        assert_eq!(
            err,
            ItemError::DimensionTooLarge {
                width: 33,
                height: 8,
                max_dim: 32
            }
        );
    }

    #[test]
    fn test_file_size_limit() {
        let limits = LimitsConfig {
            max_file_size_mb: 1,
            ..Default::default()
        };
        let err = DecodeStage::new(&limits)
            .apply(Frame::new(vec![0u8; 2 * 1024 * 1024]), &descriptor(&[]))
            .unwrap_err();
        assert_eq!(err, ItemError::FileTooLarge { size_mb: 2, max_mb: 1 });
        assert_eq!(err.kind(), "FileTooLarge");
    }

    #[test]
    fn test_text_file_is_unsupported() {
        let err = stage()
            .apply(Frame::new(b"just some text".to_vec()), &descriptor(&[]))
            .unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFormat");
    }

    #[test]
    fn test_orientation_defaults_without_exif() {
        assert_eq!(read_orientation(&png_bytes(4, 4)), 1);
        assert_eq!(read_orientation(b"garbage"), 1);
    }
}
