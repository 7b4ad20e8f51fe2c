//! The canonical, hashable transform descriptor.
//!
//! A descriptor is only ever built by the resolver, which normalizes every
//! field. Its serde form therefore doubles as the canonical serialization:
//! structs serialize in declaration order and no field holds a map or float.

use image::ImageFormat;
use serde::{Deserialize, Serialize};

/// Bumped whenever stage output for an unchanged descriptor would change.
const FINGERPRINT_VERSION: &str = "prism-transform-v1";

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
}

impl OutputFormat {
    /// Parse a user-supplied format name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// File extension for artifacts in this format.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        }
    }

    /// MIME type for artifacts in this format.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
        }
    }

    /// Whether the encoder keeps an alpha channel.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, OutputFormat::Jpeg)
    }

    /// Whether the quality setting affects encoder output.
    pub fn uses_quality(self) -> bool {
        !matches!(self, OutputFormat::Png)
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Webp => ImageFormat::WebP,
        }
    }
}

/// How the image is fitted into the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Preserve aspect, fit inside the box, letterbox to the exact size
    Contain,
    /// Preserve aspect, fill the box, crop the overflow around the centre
    Cover,
    /// Stretch to the exact size
    Fill,
    /// Preserve aspect, fit inside the box, never upscale
    Inside,
    /// Preserve aspect, cover the box without cropping
    Outside,
}

impl FitMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contain" => Some(Self::Contain),
            "cover" => Some(Self::Cover),
            "fill" | "stretch" => Some(Self::Fill),
            "inside" => Some(Self::Inside),
            "outside" => Some(Self::Outside),
            _ => None,
        }
    }
}

/// Watermark placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    Top,
    TopRight,
    Left,
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
    /// Repeat across the whole image
    Tile,
}

impl WatermarkPosition {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "top-left" => Some(Self::TopLeft),
            "top" => Some(Self::Top),
            "top-right" => Some(Self::TopRight),
            "left" => Some(Self::Left),
            "center" | "centre" => Some(Self::Center),
            "right" => Some(Self::Right),
            "bottom-left" => Some(Self::BottomLeft),
            "bottom" => Some(Self::Bottom),
            "bottom-right" => Some(Self::BottomRight),
            "tile" => Some(Self::Tile),
            _ => None,
        }
    }
}

/// Compositing mode for the watermark layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    Normal,
    Multiply,
    Screen,
    Overlay,
}

impl BlendMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" | "over" => Some(Self::Normal),
            "multiply" => Some(Self::Multiply),
            "screen" => Some(Self::Screen),
            "overlay" => Some(Self::Overlay),
            _ => None,
        }
    }
}

/// What the watermark draws.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WatermarkContent {
    /// Text rendered with the configured font. `font_size` of `None`
    /// scales with the image width.
    Text { text: String, font_size: Option<u32> },
    /// An overlay image held in the object store, scaled to a percentage of
    /// the target width.
    Image { overlay: String, scale_percent: u32 },
}

/// Fully normalized watermark parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Watermark {
    pub content: WatermarkContent,
    pub position: WatermarkPosition,
    /// Distance from the anchoring edges in pixels
    pub margin: u32,
    /// Opacity in percent, 0-100
    pub opacity: u8,
    /// Clockwise rotation in degrees, 0-359
    pub rotation: u16,
    pub blend: BlendMode,
    /// RGBA text colour
    pub color: [u8; 4],
}

/// A thumbnail size in the fan-out stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThumbnailPreset {
    /// Longest edge in pixels
    pub size: u32,
    pub name: String,
}

impl ThumbnailPreset {
    /// Named thumbnail sizes.
    pub const NAMED: [(&'static str, u32); 4] = [
        ("small", 150),
        ("medium", 300),
        ("large", 600),
        ("xlarge", 1200),
    ];

    /// Build a preset from a name or an explicit pixel size. Sizes that
    /// match a named preset normalize to that name.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some((name, size)) = Self::NAMED.iter().find(|(name, _)| *name == s) {
            return Some(Self {
                size: *size,
                name: (*name).to_string(),
            });
        }
        let size: u32 = s.strip_suffix("px").unwrap_or(s).parse().ok()?;
        if size == 0 {
            return None;
        }
        Some(Self::from_size(size))
    }

    fn from_size(size: u32) -> Self {
        match Self::NAMED.iter().find(|(_, named)| *named == size) {
            Some((name, _)) => Self {
                size,
                name: (*name).to_string(),
            },
            None => Self {
                size,
                name: format!("custom-{size}"),
            },
        }
    }
}

/// Canonical representation of a requested transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformDescriptor {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: FitMode,
    pub format: OutputFormat,
    pub quality: u8,
    /// Apply EXIF orientation before resizing
    pub auto_orient: bool,
    pub watermark: Option<Watermark>,
    /// Sorted by size, no duplicates
    pub thumbnails: Vec<ThumbnailPreset>,
}

impl TransformDescriptor {
    /// Canonical serialized form. Semantically equal descriptors produce
    /// byte-identical output.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Stable hex digest of the canonical form.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_VERSION.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.canonical_json().as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Whether any resize is requested.
    pub fn has_resize(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }

    /// Text watermark, if one is requested.
    pub fn text_watermark(&self) -> Option<&str> {
        match self.watermark.as_ref().map(|w| &w.content) {
            Some(WatermarkContent::Text { text, .. }) => Some(text),
            _ => None,
        }
    }

    /// Overlay image reference, if an image watermark is requested.
    pub fn overlay_ref(&self) -> Option<&str> {
        match self.watermark.as_ref().map(|w| &w.content) {
            Some(WatermarkContent::Image { overlay, .. }) => Some(overlay),
            _ => None,
        }
    }
}
