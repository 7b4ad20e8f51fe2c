//! Fan-out stage: one extra encoded output per requested thumbnail size,
//! derived from the finished working image.

use image::imageops::FilterType;
use image::GenericImageView;

use super::encode::encode_image;
use super::stage::{EncodedOutput, Frame, Stage};
use crate::error::PipelineResult;
use crate::store::ArtifactRole;
use crate::transform::TransformDescriptor;

pub struct FanoutStage;

impl Stage for FanoutStage {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn progress_weight(&self) -> u32 {
        3
    }

    fn applies_to(&self, descriptor: &TransformDescriptor) -> bool {
        !descriptor.thumbnails.is_empty()
    }

    fn apply(&self, mut frame: Frame, descriptor: &TransformDescriptor) -> PipelineResult<Frame> {
        let image = frame.working(self.name())?;
        let (w, h) = image.dimensions();

        let mut thumbs = Vec::with_capacity(descriptor.thumbnails.len());
        for preset in &descriptor.thumbnails {
            // Never upscale
            let thumb = if w.max(h) <= preset.size {
                image.clone()
            } else {
                image.resize(preset.size, preset.size, FilterType::Lanczos3)
            };
            let (tw, th) = thumb.dimensions();
            let bytes = encode_image(&thumb, descriptor.format, descriptor.quality, self.name())?;
            thumbs.push(EncodedOutput {
                role: ArtifactRole::Thumbnail {
                    preset: preset.name.clone(),
                },
                format: descriptor.format,
                width: tw,
                height: th,
                bytes,
            });
        }
        frame.outputs.extend(thumbs);
        Ok(frame)
    }
}
