//! Watermark stage: render a text or overlay layer and composite it onto
//! the working image.

use ab_glyph::{FontArc, PxScale};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Weak};

use super::stage::{Frame, Stage};
use crate::config::WatermarkConfig;
use crate::error::{ItemError, PipelineResult};
use crate::store::ArtifactStore;
use crate::transform::{BlendMode, TransformDescriptor, Watermark, WatermarkContent, WatermarkPosition};

const MIN_AUTO_FONT_PX: f32 = 12.0;

/// Decoded overlays recently used plus those still pinned by a live batch.
struct Overlays {
    recent: LruCache<String, Arc<DynamicImage>>,
    pinned: HashMap<String, Weak<DynamicImage>>,
}

impl Overlays {
    fn get(&mut self, uri: &str) -> Option<Arc<DynamicImage>> {
        if let Some(image) = self.recent.get(uri) {
            return Some(Arc::clone(image));
        }
        let image = self.pinned.get(uri)?.upgrade()?;
        self.recent.put(uri.to_string(), Arc::clone(&image));
        Some(image)
    }

    fn insert(&mut self, uri: &str, image: Arc<DynamicImage>) {
        self.pinned.retain(|_, weak| weak.strong_count() > 0);
        self.pinned.insert(uri.to_string(), Arc::downgrade(&image));
        self.recent.put(uri.to_string(), image);
    }
}

/// Font and overlay images needed to render watermarks. Overlays are
/// loaded at batch submission so stages never touch the store; the batch
/// holds the returned handle until it finishes.
pub struct WatermarkAssets {
    font: Option<FontArc>,
    overlays: Mutex<Overlays>,
}

impl Default for WatermarkAssets {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WatermarkAssets {
    pub fn new(font: Option<FontArc>) -> Self {
        Self::with_overlay_capacity(font, WatermarkConfig::default().overlay_cache_entries)
    }

    /// `capacity` bounds overlays kept once no batch uses them.
    pub fn with_overlay_capacity(font: Option<FontArc>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            font,
            overlays: Mutex::new(Overlays {
                recent: LruCache::new(capacity),
                pinned: HashMap::new(),
            }),
        }
    }

    /// Load a TrueType/OpenType font from disk.
    pub fn load_font(path: &Path) -> Result<FontArc, String> {
        let data = std::fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
        FontArc::try_from_vec(data).map_err(|e| format!("{}: {e}", path.display()))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Fetch and decode an overlay image unless it is already resident.
    pub async fn ensure_overlay(
        &self,
        store: &dyn ArtifactStore,
        uri: &str,
    ) -> Result<Arc<DynamicImage>, String> {
        if let Some(image) = self.overlay(uri) {
            return Ok(image);
        }
        let bytes = store.get(uri).await.map_err(|e| e.to_string())?;
        let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| format!("overlay is not a decodable image: {e}"))?;
        let image = Arc::new(image);
        self.overlays.lock().insert(uri, Arc::clone(&image));
        Ok(image)
    }

    fn overlay(&self, uri: &str) -> Option<Arc<DynamicImage>> {
        self.overlays.lock().get(uri)
    }
}

pub struct WatermarkStage {
    assets: Arc<WatermarkAssets>,
}

impl WatermarkStage {
    pub fn new(assets: Arc<WatermarkAssets>) -> Self {
        Self { assets }
    }

    fn render_layer(&self, watermark: &Watermark, base_width: u32) -> PipelineResult<RgbaImage> {
        match &watermark.content {
            WatermarkContent::Text { text, font_size } => {
                let font = self
                    .assets
                    .font
                    .as_ref()
                    .ok_or_else(|| ItemError::encode("watermark", "no font configured"))?;
                let px = font_size
                    .map(|s| s as f32)
                    .unwrap_or_else(|| (base_width as f32 * 0.05).max(MIN_AUTO_FONT_PX));
                let scale = PxScale::from(px);
                let (tw, th) = text_size(scale, font, text);
                let pad = (px / 4.0).ceil() as u32;
                let mut layer = RgbaImage::new(tw + 2 * pad, th + 2 * pad);
                draw_text_mut(
                    &mut layer,
                    Rgba(watermark.color),
                    pad as i32,
                    pad as i32,
                    scale,
                    font,
                    text,
                );
                Ok(layer)
            }
            WatermarkContent::Image {
                overlay,
                scale_percent,
            } => {
                let image = self.assets.overlay(overlay).ok_or_else(|| {
                    ItemError::encode("watermark", format!("overlay {overlay} not loaded"))
                })?;
                let (ow, oh) = image.dimensions();
                let width = (base_width * scale_percent / 100).max(1);
                let height = ((u64::from(oh) * u64::from(width)) / u64::from(ow.max(1))).max(1) as u32;
                Ok(image.resize_exact(width, height, FilterType::Lanczos3).to_rgba8())
            }
        }
    }
}

impl Stage for WatermarkStage {
    fn name(&self) -> &'static str {
        "watermark"
    }

    fn progress_weight(&self) -> u32 {
        2
    }

    fn applies_to(&self, descriptor: &TransformDescriptor) -> bool {
        descriptor.watermark.is_some()
    }

    fn apply(&self, mut frame: Frame, descriptor: &TransformDescriptor) -> PipelineResult<Frame> {
        let Some(watermark) = &descriptor.watermark else {
            return Ok(frame);
        };
        let image = frame.take_working(self.name())?;
        let had_alpha = image.color().has_alpha();
        let mut base = image.to_rgba8();

        let mut layer = self.render_layer(watermark, base.width())?;
        if watermark.rotation != 0 {
            layer = rotate_layer(&layer, watermark.rotation);
        }
        scale_alpha(&mut layer, watermark.opacity);

        for (x, y) in placements(
            (base.width(), base.height()),
            (layer.width(), layer.height()),
            watermark.position,
            watermark.margin,
        ) {
            composite(&mut base, &layer, x, y, watermark.blend);
        }

        frame.image = Some(if had_alpha {
            DynamicImage::ImageRgba8(base)
        } else {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(base).to_rgb8())
        });
        Ok(frame)
    }
}

/// Rotate clockwise by `degrees` on a canvas large enough to keep the
/// corners, then trim to the visible pixels.
fn rotate_layer(layer: &RgbaImage, degrees: u16) -> RgbaImage {
    let (w, h) = layer.dimensions();
    let side = (f64::from(w).hypot(f64::from(h))).ceil() as u32;
    let mut padded = RgbaImage::new(side, side);
    image::imageops::overlay(
        &mut padded,
        layer,
        i64::from((side - w) / 2),
        i64::from((side - h) / 2),
    );
    let rotated = rotate_about_center(
        &padded,
        f32::from(degrees).to_radians(),
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 0]),
    );
    trim_transparent(rotated)
}

fn trim_transparent(image: RgbaImage) -> RgbaImage {
    let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0, 0);
    for (x, y, px) in image.enumerate_pixels() {
        if px.0[3] > 0 {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
    }
    if x0 > x1 || y0 > y1 {
        return image;
    }
    image::imageops::crop_imm(&image, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image()
}

fn scale_alpha(layer: &mut RgbaImage, opacity: u8) {
    let opacity = u32::from(opacity.min(100));
    for px in layer.pixels_mut() {
        px.0[3] = ((u32::from(px.0[3]) * opacity + 50) / 100) as u8;
    }
}

/// Top-left corners at which the layer is drawn.
fn placements(
    base: (u32, u32),
    layer: (u32, u32),
    position: WatermarkPosition,
    margin: u32,
) -> Vec<(i64, i64)> {
    let (bw, bh) = (i64::from(base.0), i64::from(base.1));
    let (lw, lh) = (i64::from(layer.0), i64::from(layer.1));
    let m = i64::from(margin);

    if position == WatermarkPosition::Tile {
        let step_x = (lw + m).max(1);
        let step_y = (lh + m).max(1);
        let mut out = Vec::new();
        let mut y = m / 2;
        while y < bh {
            let mut x = m / 2;
            while x < bw {
                out.push((x, y));
                x += step_x;
            }
            y += step_y;
        }
        return out;
    }

    use WatermarkPosition::*;
    let x = match position {
        TopLeft | Left | BottomLeft => m,
        Top | Center | Bottom => (bw - lw) / 2,
        _ => bw - lw - m,
    };
    let y = match position {
        TopLeft | Top | TopRight => m,
        Left | Center | Right => (bh - lh) / 2,
        _ => bh - lh - m,
    };
    vec![(x, y)]
}

fn blend_channel(mode: BlendMode, src: f32, dst: f32) -> f32 {
    match mode {
        BlendMode::Normal => src,
        BlendMode::Multiply => src * dst,
        BlendMode::Screen => 1.0 - (1.0 - src) * (1.0 - dst),
        BlendMode::Overlay => {
            if dst < 0.5 {
                2.0 * src * dst
            } else {
                1.0 - 2.0 * (1.0 - src) * (1.0 - dst)
            }
        }
    }
}

/// Source-over composite of `layer` at (`x`, `y`), clipped to `base`.
fn composite(base: &mut RgbaImage, layer: &RgbaImage, x: i64, y: i64, mode: BlendMode) {
    let (bw, bh) = (i64::from(base.width()), i64::from(base.height()));
    for (lx, ly, src) in layer.enumerate_pixels() {
        let (tx, ty) = (x + i64::from(lx), y + i64::from(ly));
        if tx < 0 || ty < 0 || tx >= bw || ty >= bh || src.0[3] == 0 {
            continue;
        }
        let dst = base.get_pixel_mut(tx as u32, ty as u32);
        let sa = f32::from(src.0[3]) / 255.0;
        let da = f32::from(dst.0[3]) / 255.0;
        for c in 0..3 {
            let s = f32::from(src.0[c]) / 255.0;
            let d = f32::from(dst.0[c]) / 255.0;
            let mixed = d * (1.0 - sa) + blend_channel(mode, s, d) * sa;
            dst.0[c] = (mixed * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        dst.0[3] = ((sa + da * (1.0 - sa)) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}
