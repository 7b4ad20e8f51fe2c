//! Colour stage: normalize the working image to 8-bit RGB or RGBA as the
//! output format requires.

use image::{DynamicImage, Rgb, RgbImage};

use super::stage::{Frame, Stage};
use crate::error::PipelineResult;
use crate::transform::TransformDescriptor;

pub struct ColorStage;

impl Stage for ColorStage {
    fn name(&self) -> &'static str {
        "color"
    }

    fn apply(&self, mut frame: Frame, descriptor: &TransformDescriptor) -> PipelineResult<Frame> {
        let image = frame.take_working(self.name())?;
        let has_alpha = image.color().has_alpha();

        let normalized = if !descriptor.format.supports_alpha() {
            if has_alpha {
                DynamicImage::ImageRgb8(flatten_on_white(&image))
            } else {
                into_rgb8(image)
            }
        } else if has_alpha {
            match image {
                DynamicImage::ImageRgba8(_) => image,
                other => DynamicImage::ImageRgba8(other.to_rgba8()),
            }
        } else {
            into_rgb8(image)
        };

        frame.image = Some(normalized);
        Ok(frame)
    }
}

fn into_rgb8(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) => image,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Composite onto an opaque white background.
pub fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let a = u32::from(a);
        let mix = |c: u8| ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgb([mix(r), mix(g), mix(b)]));
    }
    out
}
