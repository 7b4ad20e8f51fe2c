//! Geometry stage: EXIF auto-orientation, then resize per fit mode.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbaImage};

use super::stage::{Frame, Stage};
use crate::error::{ItemError, PipelineResult};
use crate::transform::{FitMode, TransformDescriptor};

const FILTER: FilterType = FilterType::Lanczos3;

pub struct GeometryStage {
    max_dimension: u32,
}

impl GeometryStage {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl Stage for GeometryStage {
    fn name(&self) -> &'static str {
        "geometry"
    }

    fn progress_weight(&self) -> u32 {
        3
    }

    fn applies_to(&self, descriptor: &TransformDescriptor) -> bool {
        descriptor.auto_orient || descriptor.has_resize()
    }

    fn apply(&self, mut frame: Frame, descriptor: &TransformDescriptor) -> PipelineResult<Frame> {
        let mut image = frame.take_working(self.name())?;
        if descriptor.auto_orient {
            image = apply_orientation(image, frame.orientation);
        }
        if descriptor.has_resize() {
            let target = target_box(image.dimensions(), descriptor.width, descriptor.height);
            if target.0 > self.max_dimension || target.1 > self.max_dimension {
                return Err(ItemError::encode(
                    self.name(),
                    format!(
                        "target {}x{} exceeds the {}px limit",
                        target.0, target.1, self.max_dimension
                    ),
                ));
            }
            image = fit(image, target, descriptor.fit);
        }
        frame.image = Some(image);
        Ok(frame)
    }
}

/// Rotate/flip so the image displays upright for EXIF orientation `o`.
pub fn apply_orientation(image: DynamicImage, o: u32) -> DynamicImage {
    match o {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

fn scale(value: u32, num: u32, den: u32) -> u32 {
    let scaled = (f64::from(value) * f64::from(num) / f64::from(den.max(1))).round();
    (scaled as u32).max(1)
}

/// Resolve the requested box. A single given side derives the other from
/// the source aspect ratio.
fn target_box(src: (u32, u32), width: Option<u32>, height: Option<u32>) -> (u32, u32) {
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale(src.1, w, src.0)),
        (None, Some(h)) => (scale(src.0, h, src.1), h),
        (None, None) => src,
    }
}

fn scaled_dims(src: (u32, u32), ratio: f64) -> (u32, u32) {
    let w = (f64::from(src.0) * ratio).round().max(1.0) as u32;
    let h = (f64::from(src.1) * ratio).round().max(1.0) as u32;
    (w, h)
}

fn resize_to(image: DynamicImage, dims: (u32, u32)) -> DynamicImage {
    if image.dimensions() == dims {
        image
    } else {
        image.resize_exact(dims.0, dims.1, FILTER)
    }
}

/// Fit `image` into `target` according to `mode`.
pub fn fit(image: DynamicImage, target: (u32, u32), mode: FitMode) -> DynamicImage {
    let src = image.dimensions();
    let rx = f64::from(target.0) / f64::from(src.0.max(1));
    let ry = f64::from(target.1) / f64::from(src.1.max(1));

    match mode {
        FitMode::Fill => resize_to(image, target),
        FitMode::Cover => {
            if src == target {
                image
            } else {
                image.resize_to_fill(target.0, target.1, FILTER)
            }
        }
        FitMode::Inside => resize_to(image, scaled_dims(src, rx.min(ry).min(1.0))),
        FitMode::Outside => resize_to(image, scaled_dims(src, rx.max(ry))),
        FitMode::Contain => {
            let inner = resize_to(image, scaled_dims(src, rx.min(ry)));
            if inner.dimensions() == target {
                return inner;
            }
            let (iw, ih) = inner.dimensions();
            let mut canvas = RgbaImage::new(target.0, target.1);
            let x = i64::from(target.0.saturating_sub(iw) / 2);
            let y = i64::from(target.1.saturating_sub(ih) / 2);
            imageops::overlay(&mut canvas, &inner.to_rgba8(), x, y);
            DynamicImage::ImageRgba8(canvas)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn img(w: u32, h: u32) -> DynamicImage {
        DynamicImage::new_rgb8(w, h)
    }

    #[test]
    fn test_inside_never_upscales() {
        assert_eq!(fit(img(400, 200), (1920, 1080), FitMode::Inside).dimensions(), (400, 200));
        assert_eq!(fit(img(4000, 2000), (1920, 1080), FitMode::Inside).dimensions(), (1920, 960));
    }

    #[test]
    fn test_cover_fills_exactly() {
        assert_eq!(fit(img(400, 200), (300, 300), FitMode::Cover).dimensions(), (300, 300));
    }

    #[test]
    fn test_fill_stretches() {
        assert_eq!(fit(img(400, 200), (100, 100), FitMode::Fill).dimensions(), (100, 100));
    }

    #[test]
    fn test_outside_covers_without_crop() {
        assert_eq!(fit(img(400, 200), (100, 100), FitMode::Outside).dimensions(), (200, 100));
    }

    #[test]
    fn test_contain_letterboxes_transparent() {
        let out = fit(img(400, 200), (100, 100), FitMode::Contain);
        assert_eq!(out.dimensions(), (100, 100));
        let rgba = out.to_rgba8();
        assert_eq!(rgba.get_pixel(50, 0).0[3], 0);
        assert_eq!(rgba.get_pixel(50, 50).0[3], 255);
    }

    #[test]
    fn test_single_side_keeps_aspect() {
        assert_eq!(target_box((400, 200), Some(100), None), (100, 50));
        assert_eq!(target_box((400, 200), None, Some(100)), (200, 100));
    }

    #[test]
    fn test_orientation_six_rotates() {
        let mut base = image::RgbImage::new(4, 2);
        base.put_pixel(0, 0, Rgb([255, 0, 0]));
        let rotated = apply_orientation(DynamicImage::ImageRgb8(base), 6).to_rgb8();
        assert_eq!(rotated.dimensions(), (2, 4));
        // Top-left moves to top-right under a clockwise quarter turn
        assert_eq!(rotated.get_pixel(1, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_orientation_one_is_identity() {
        let out = apply_orientation(img(3, 5), 1);
        assert_eq!(out.dimensions(), (3, 5));
    }
}
