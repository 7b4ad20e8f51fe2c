//! Per-image transform pipeline.
//!
//! Stages run in a fixed order on a [`Frame`]:
//! decode, geometry, color, watermark, encode, fanout.

pub mod color;
pub mod decode;
pub mod encode;
pub mod executor;
pub mod fanout;
pub mod geometry;
pub mod hash;
pub mod stage;
pub mod validate;
pub mod watermark;

pub use executor::{PipelineExecutor, PipelineOutput, StageReport};
pub use stage::{EncodedOutput, Frame, Stage};
pub use watermark::WatermarkAssets;

#[cfg(test)]
pub(crate) mod testing {
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    use crate::transform::{TransformDescriptor, TransformRequest, TransformResolver};

    /// Resolve an option list, panicking on invalid input.
    pub fn descriptor(pairs: &[(&str, &str)]) -> TransformDescriptor {
        let options = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TransformResolver::new()
            .resolve(&TransformRequest::Options(options))
            .unwrap()
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let mut img = RgbImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
        }
        DynamicImage::ImageRgb8(img)
    }

    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        gradient(width, height)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }
}
