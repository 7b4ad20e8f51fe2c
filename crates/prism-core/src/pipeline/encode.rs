//! Encode stage: serialize the working image in the requested format.
//!
//! Encoders are driven directly so no source metadata is ever carried into
//! an output.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, GenericImageView};

use super::stage::{EncodedOutput, Frame, Stage};
use crate::error::{ItemError, PipelineResult};
use crate::store::ArtifactRole;
use crate::transform::{OutputFormat, TransformDescriptor};

pub struct EncodeStage;

impl Stage for EncodeStage {
    fn name(&self) -> &'static str {
        "encode"
    }

    fn progress_weight(&self) -> u32 {
        3
    }

    fn apply(&self, mut frame: Frame, descriptor: &TransformDescriptor) -> PipelineResult<Frame> {
        let image = frame.working(self.name())?;
        let (width, height) = image.dimensions();
        let bytes = encode_image(image, descriptor.format, descriptor.quality, self.name())?;
        frame.outputs.push(EncodedOutput {
            role: ArtifactRole::Primary,
            format: descriptor.format,
            width,
            height,
            bytes,
        });
        Ok(frame)
    }
}

/// Encode `image` as `format`. `quality` drives JPEG and lossy WebP; PNG
/// ignores it.
pub fn encode_image(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
    stage: &str,
) -> PipelineResult<Vec<u8>> {
    let mut buf = Vec::new();
    let result = match format {
        OutputFormat::Jpeg => {
            let rgb;
            let image = if image.color().has_alpha() {
                rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                &rgb
            } else {
                image
            };
            image.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))
        }
        OutputFormat::Png => image.write_with_encoder(PngEncoder::new(&mut buf)),
        OutputFormat::Webp => return encode_webp(image, quality, stage),
    };
    result.map_err(|e| ItemError::encode(stage, e.to_string()))?;
    Ok(buf)
}

fn encode_webp(image: &DynamicImage, quality: u8, stage: &str) -> PipelineResult<Vec<u8>> {
    let (width, height) = image.dimensions();
    let quality = f32::from(quality.clamp(1, 100));
    let encoded = if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height).encode_simple(false, quality)
    } else {
        let rgb = image.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height).encode_simple(false, quality)
    };
    encoded
        .map(|memory| memory.to_vec())
        .map_err(|e| ItemError::encode(stage, format!("webp: {e:?}")))
}
