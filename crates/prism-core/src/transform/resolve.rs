//! Resolution of presets and loosely typed option maps into descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::descriptor::{
    BlendMode, FitMode, OutputFormat, ThumbnailPreset, TransformDescriptor, Watermark,
    WatermarkContent, WatermarkPosition,
};
use super::preset;
use crate::error::BatchError;

const DEFAULT_FORMAT: OutputFormat = OutputFormat::Webp;
const DEFAULT_QUALITY: u8 = 85;
const DEFAULT_FIT: FitMode = FitMode::Inside;
const MAX_DIMENSION: u64 = 65_535;
const MAX_WATERMARK_TEXT: usize = 200;

const DEFAULT_WATERMARK_MARGIN: u32 = 20;
const DEFAULT_WATERMARK_OPACITY: u8 = 50;
const DEFAULT_WATERMARK_SCALE: u32 = 20;
const DEFAULT_WATERMARK_COLOR: [u8; 4] = [255, 255, 255, 255];

const KNOWN_KEYS: &[&str] = &[
    "width",
    "height",
    "fit",
    "format",
    "quality",
    "thumbnails",
    "auto_orient",
    "watermark_text",
    "watermark_image",
    "watermark_font_size",
    "watermark_scale",
    "watermark_position",
    "watermark_margin",
    "watermark_opacity",
    "watermark_rotation",
    "watermark_blend",
    "watermark_color",
];

/// What the caller asked for, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformRequest {
    /// A built-in preset by name
    Preset(String),
    /// Explicit options, as received at the edge
    Options(BTreeMap<String, String>),
    /// A preset whose values are overridden by explicit options
    PresetWithOverrides {
        preset: String,
        overrides: BTreeMap<String, String>,
    },
}

impl TransformRequest {
    /// Build a request from raw form fields. A `preset` field selects the
    /// preset; any remaining non-empty fields override it.
    pub fn from_fields(mut fields: BTreeMap<String, String>) -> Self {
        fields.retain(|_, v| !v.trim().is_empty());
        match fields.remove("preset") {
            Some(name) if fields.is_empty() => TransformRequest::Preset(name),
            Some(name) => TransformRequest::PresetWithOverrides {
                preset: name,
                overrides: fields,
            },
            None => TransformRequest::Options(fields),
        }
    }
}

/// Turns transform requests into canonical descriptors.
///
/// Resolution is pure: no I/O, no clock, no configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformResolver;

impl TransformResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a request into a validated descriptor.
    pub fn resolve(&self, request: &TransformRequest) -> Result<TransformDescriptor, BatchError> {
        let options = match request {
            TransformRequest::Preset(name) => lookup_preset(name)?.option_map(),
            TransformRequest::Options(options) => normalize_keys(options)?,
            TransformRequest::PresetWithOverrides { preset, overrides } => {
                let mut merged = lookup_preset(preset)?.option_map();
                merged.extend(normalize_keys(overrides)?);
                merged
            }
        };
        build_descriptor(&options)
    }
}

fn lookup_preset(name: &str) -> Result<&'static preset::Preset, BatchError> {
    preset::find(name).ok_or_else(|| {
        let known: Vec<&str> = preset::PRESETS.iter().map(|p| p.name).collect();
        BatchError::invalid(
            "preset",
            format!("unknown preset `{}` (known: {})", name.trim(), known.join(", ")),
        )
    })
}

/// Lower-case keys, map `-` to `_`, trim values, drop empties, and reject
/// unknown or conflicting keys.
fn normalize_keys(raw: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>, BatchError> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let key = key.trim().to_ascii_lowercase().replace('-', "_");
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if !KNOWN_KEYS.contains(&key.as_str()) {
            return Err(BatchError::invalid(key, "unknown option"));
        }
        if let Some(existing) = out.get(&key) {
            if existing != value {
                return Err(BatchError::invalid(key, "given more than once with different values"));
            }
        }
        out.insert(key, value.to_string());
    }
    Ok(out)
}

fn build_descriptor(options: &BTreeMap<String, String>) -> Result<TransformDescriptor, BatchError> {
    let get = |key: &str| options.get(key).map(String::as_str);

    let width = get("width").map(|v| parse_dimension("width", v)).transpose()?;
    let height = get("height").map(|v| parse_dimension("height", v)).transpose()?;

    let format = match get("format") {
        Some(v) => OutputFormat::parse(&v.to_ascii_lowercase())
            .ok_or_else(|| BatchError::invalid("format", format!("unsupported output format `{v}`")))?,
        None => DEFAULT_FORMAT,
    };

    let quality = match get("quality") {
        Some(v) => {
            let q = parse_integer("quality", v)?;
            if !(1..=100).contains(&q) {
                return Err(BatchError::invalid("quality", "must be between 1 and 100"));
            }
            q as u8
        }
        None => DEFAULT_QUALITY,
    };

    let fit = match get("fit") {
        Some(v) => FitMode::parse(&v.to_ascii_lowercase())
            .ok_or_else(|| BatchError::invalid("fit", format!("unknown fit mode `{v}`")))?,
        None => DEFAULT_FIT,
    };

    let auto_orient = match get("auto_orient") {
        Some(v) => parse_bool("auto_orient", v)?,
        None => true,
    };

    let thumbnails = match get("thumbnails") {
        Some(v) => parse_thumbnails(v)?,
        None => Vec::new(),
    };

    let watermark = build_watermark(options)?;

    Ok(TransformDescriptor {
        width,
        height,
        // Fit only matters when there is a box to fit into
        fit: if width.is_some() || height.is_some() {
            fit
        } else {
            DEFAULT_FIT
        },
        format,
        quality: if format.uses_quality() { quality } else { 100 },
        auto_orient,
        watermark,
        thumbnails,
    })
}

fn build_watermark(options: &BTreeMap<String, String>) -> Result<Option<Watermark>, BatchError> {
    let get = |key: &str| options.get(key).map(String::as_str);

    let content = match (get("watermark_text"), get("watermark_image")) {
        (Some(_), Some(_)) => {
            return Err(BatchError::invalid(
                "watermark_image",
                "cannot be combined with watermark_text",
            ))
        }
        (Some(text), None) => {
            if get("watermark_scale").is_some() {
                return Err(BatchError::invalid("watermark_scale", "requires watermark_image"));
            }
            if text.chars().count() > MAX_WATERMARK_TEXT {
                return Err(BatchError::invalid(
                    "watermark_text",
                    format!("longer than {MAX_WATERMARK_TEXT} characters"),
                ));
            }
            let font_size = get("watermark_font_size")
                .map(|v| parse_bounded("watermark_font_size", v, 4, 2048))
                .transpose()?;
            WatermarkContent::Text {
                text: text.to_string(),
                font_size,
            }
        }
        (None, Some(overlay)) => {
            for field in ["watermark_font_size", "watermark_color"] {
                if get(field).is_some() {
                    return Err(BatchError::invalid(field, "requires watermark_text"));
                }
            }
            if overlay.split('/').any(|part| part == "..") {
                return Err(BatchError::invalid("watermark_image", "must not contain `..`"));
            }
            let scale_percent = get("watermark_scale")
                .map(|v| parse_bounded("watermark_scale", v, 1, 100))
                .transpose()?
                .unwrap_or(DEFAULT_WATERMARK_SCALE);
            WatermarkContent::Image {
                overlay: overlay.to_string(),
                scale_percent,
            }
        }
        (None, None) => {
            if let Some(stray) = options.keys().find(|k| k.starts_with("watermark_")) {
                return Err(BatchError::invalid(
                    stray.clone(),
                    "requires watermark_text or watermark_image",
                ));
            }
            return Ok(None);
        }
    };

    let position = match get("watermark_position") {
        Some(v) => WatermarkPosition::parse(&v.to_ascii_lowercase()).ok_or_else(|| {
            BatchError::invalid("watermark_position", format!("unknown position `{v}`"))
        })?,
        None => WatermarkPosition::BottomRight,
    };
    let margin = get("watermark_margin")
        .map(|v| parse_bounded("watermark_margin", v, 0, 10_000))
        .transpose()?
        .unwrap_or(DEFAULT_WATERMARK_MARGIN);
    let opacity = get("watermark_opacity")
        .map(parse_opacity)
        .transpose()?
        .unwrap_or(DEFAULT_WATERMARK_OPACITY);
    let rotation = get("watermark_rotation")
        .map(parse_rotation)
        .transpose()?
        .unwrap_or(0);
    let blend = match get("watermark_blend") {
        Some(v) => BlendMode::parse(&v.to_ascii_lowercase()).ok_or_else(|| {
            BatchError::invalid("watermark_blend", format!("unknown blend mode `{v}`"))
        })?,
        None => BlendMode::Normal,
    };
    let color = get("watermark_color")
        .map(parse_color)
        .transpose()?
        .unwrap_or(DEFAULT_WATERMARK_COLOR);

    Ok(Some(Watermark {
        content,
        position,
        margin,
        opacity,
        rotation,
        blend,
        color,
    }))
}

/// Parse an integer, accepting leading zeros and integral decimals
/// (`"085"` and `"85.0"` both read as 85).
fn parse_integer(field: &str, value: &str) -> Result<i64, BatchError> {
    if let Ok(n) = value.parse::<i64>() {
        return Ok(n);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => Ok(f as i64),
        _ => Err(BatchError::invalid(field, format!("`{value}` is not an integer"))),
    }
}

fn parse_bounded(field: &str, value: &str, min: u32, max: u32) -> Result<u32, BatchError> {
    let n = parse_integer(field, value)?;
    if n < i64::from(min) || n > i64::from(max) {
        return Err(BatchError::invalid(
            field,
            format!("must be between {min} and {max}"),
        ));
    }
    Ok(n as u32)
}

fn parse_dimension(field: &str, value: &str) -> Result<u32, BatchError> {
    let n = parse_integer(field, value)?;
    if n <= 0 {
        return Err(BatchError::invalid(field, "must be a positive number of pixels"));
    }
    if n as u64 > MAX_DIMENSION {
        return Err(BatchError::invalid(
            field,
            format!("must not exceed {MAX_DIMENSION} pixels"),
        ));
    }
    Ok(n as u32)
}

fn parse_bool(field: &str, value: &str) -> Result<bool, BatchError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(BatchError::invalid(field, format!("`{value}` is not a boolean"))),
    }
}

/// Opacity as a fraction (`0.5`) or a percentage (`50%`), stored as whole
/// percent.
fn parse_opacity(value: &str) -> Result<u8, BatchError> {
    let field = "watermark_opacity";
    let fraction = match value.strip_suffix('%') {
        Some(pct) => pct
            .trim()
            .parse::<f64>()
            .map(|p| p / 100.0)
            .map_err(|_| BatchError::invalid(field, format!("`{value}` is not a number")))?,
        None => value
            .parse::<f64>()
            .map_err(|_| BatchError::invalid(field, format!("`{value}` is not a number")))?,
    };
    if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
        return Err(BatchError::invalid(field, "must be between 0 and 1"));
    }
    Ok((fraction * 100.0).round() as u8)
}

fn parse_rotation(value: &str) -> Result<u16, BatchError> {
    let degrees = parse_integer("watermark_rotation", value)?;
    if degrees <= -360 || degrees >= 360 {
        return Err(BatchError::invalid(
            "watermark_rotation",
            "must be strictly between -360 and 360",
        ));
    }
    Ok(degrees.rem_euclid(360) as u16)
}

fn parse_color(value: &str) -> Result<[u8; 4], BatchError> {
    let field = "watermark_color";
    let hex = value.strip_prefix('#').unwrap_or(value);
    if !(hex.len() == 6 || hex.len() == 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BatchError::invalid(field, "expected #RRGGBB or #RRGGBBAA"));
    }
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
    let parsed = (|| -> Result<[u8; 4], std::num::ParseIntError> {
        let alpha = if hex.len() == 8 { byte(6)? } else { 255 };
        Ok([byte(0)?, byte(2)?, byte(4)?, alpha])
    })();
    parsed.map_err(|_| BatchError::invalid(field, "expected #RRGGBB or #RRGGBBAA"))
}

fn parse_thumbnails(value: &str) -> Result<Vec<ThumbnailPreset>, BatchError> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }
    let mut presets = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let preset = ThumbnailPreset::parse(&part.to_ascii_lowercase()).ok_or_else(|| {
            BatchError::invalid("thumbnails", format!("unknown thumbnail size `{part}`"))
        })?;
        presets.push(preset);
    }
    presets.sort();
    presets.dedup();
    Ok(presets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> TransformRequest {
        TransformRequest::Options(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn resolve(request: &TransformRequest) -> Result<TransformDescriptor, BatchError> {
        TransformResolver::new().resolve(request)
    }

    fn field_of(err: BatchError) -> String {
        match err {
            BatchError::InvalidSpecification { field, .. } => field,
            other => panic!("expected InvalidSpecification, got {other:?}"),
        }
    }

    #[test]
    fn test_web_optimized_preset() {
        let d = resolve(&TransformRequest::Preset("web-optimized".into())).unwrap();
        assert_eq!(d.format, OutputFormat::Webp);
        assert_eq!(d.quality, 85);
        assert_eq!((d.width, d.height), (Some(1920), Some(1080)));
        assert_eq!(d.fit, FitMode::Inside);
    }

    #[test]
    fn test_preset_equals_equivalent_options() {
        let from_preset = resolve(&TransformRequest::Preset("web-optimized".into())).unwrap();
        let from_options = resolve(&options(&[
            ("HEIGHT", "1080"),
            ("fit", "inside"),
            ("quality", "085"),
            ("Width", " 1920 "),
            ("format", "WEBP"),
        ]))
        .unwrap();
        assert_eq!(from_preset.canonical_json(), from_options.canonical_json());
        assert_eq!(from_preset.fingerprint(), from_options.fingerprint());
    }

    #[test]
    fn test_unknown_preset() {
        let err = resolve(&TransformRequest::Preset("retro".into())).unwrap_err();
        assert_eq!(field_of(err), "preset");
    }

    #[test]
    fn test_quality_out_of_range() {
        assert_eq!(field_of(resolve(&options(&[("quality", "0")])).unwrap_err()), "quality");
        assert_eq!(field_of(resolve(&options(&[("quality", "101")])).unwrap_err()), "quality");
        assert_eq!(field_of(resolve(&options(&[("quality", "8.5")])).unwrap_err()), "quality");
    }

    #[test]
    fn test_non_positive_dimension() {
        assert_eq!(field_of(resolve(&options(&[("width", "0")])).unwrap_err()), "width");
        assert_eq!(field_of(resolve(&options(&[("height", "-5")])).unwrap_err()), "height");
        assert_eq!(field_of(resolve(&options(&[("width", "wide")])).unwrap_err()), "width");
    }

    #[test]
    fn test_unknown_option_key() {
        let err = resolve(&options(&[("sharpen", "2")])).unwrap_err();
        assert_eq!(field_of(err), "sharpen");
    }

    #[test]
    fn test_conflicting_duplicate_keys() {
        let err = resolve(&options(&[("quality", "80"), ("Quality", "90")])).unwrap_err();
        assert_eq!(field_of(err), "quality");
    }

    #[test]
    fn test_fit_ignored_without_dimensions() {
        let a = resolve(&options(&[("fit", "cover")])).unwrap();
        let b = resolve(&options(&[])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_png_quality_normalized() {
        let a = resolve(&options(&[("format", "png"), ("quality", "40")])).unwrap();
        let b = resolve(&options(&[("format", "png")])).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_thumbnails_order_and_duplicates_irrelevant() {
        let a = resolve(&options(&[("thumbnails", "large,small,300")])).unwrap();
        let b = resolve(&options(&[("thumbnails", "small, medium,large,small")])).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        let sizes: Vec<u32> = a.thumbnails.iter().map(|t| t.size).collect();
        assert_eq!(sizes, vec![150, 300, 600]);
    }

    #[test]
    fn test_different_semantics_different_fingerprint() {
        let a = resolve(&options(&[("width", "800")])).unwrap();
        let b = resolve(&options(&[("width", "801")])).unwrap();
        let c = resolve(&options(&[("width", "800"), ("format", "jpeg")])).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_preset_with_overrides() {
        let d = resolve(&TransformRequest::PresetWithOverrides {
            preset: "social-media".into(),
            overrides: [("quality".to_string(), "70".to_string())].into(),
        })
        .unwrap();
        assert_eq!(d.quality, 70);
        assert_eq!(d.format, OutputFormat::Jpeg);
        assert_eq!(d.fit, FitMode::Cover);
    }

    #[test]
    fn test_from_fields() {
        let fields: BTreeMap<String, String> = [
            ("preset".to_string(), "gallery".to_string()),
            ("quality".to_string(), "".to_string()),
        ]
        .into();
        assert_eq!(
            TransformRequest::from_fields(fields),
            TransformRequest::Preset("gallery".into())
        );
    }

    #[test]
    fn test_text_watermark_normalization() {
        let a = resolve(&options(&[
            ("watermark_text", "© Prism"),
            ("watermark_opacity", "0.5"),
            ("watermark_rotation", "-45"),
            ("watermark_color", "#ff0000"),
        ]))
        .unwrap();
        let b = resolve(&options(&[
            ("watermark_rotation", "315"),
            ("watermark_color", "FF0000FF"),
            ("watermark_opacity", "50%"),
            ("watermark_text", "© Prism"),
        ]))
        .unwrap();
        assert_eq!(a, b);
        let wm = a.watermark.unwrap();
        assert_eq!(wm.opacity, 50);
        assert_eq!(wm.rotation, 315);
        assert_eq!(wm.color, [255, 0, 0, 255]);
        assert_eq!(wm.position, WatermarkPosition::BottomRight);
    }

    #[test]
    fn test_watermark_field_validation() {
        let err = resolve(&options(&[("watermark_text", "x"), ("watermark_opacity", "1.5")]))
            .unwrap_err();
        assert_eq!(field_of(err), "watermark_opacity");

        let err = resolve(&options(&[("watermark_opacity", "0.3")])).unwrap_err();
        assert_eq!(field_of(err), "watermark_opacity");

        let err = resolve(&options(&[("watermark_text", "x"), ("watermark_image", "logo.png")]))
            .unwrap_err();
        assert_eq!(field_of(err), "watermark_image");

        let err = resolve(&options(&[("watermark_image", "logo.png"), ("watermark_color", "#fff")]))
            .unwrap_err();
        assert_eq!(field_of(err), "watermark_color");
    }

    #[test]
    fn test_image_watermark_defaults() {
        let d = resolve(&options(&[("watermark_image", "sources/logo.png")])).unwrap();
        match d.watermark.unwrap().content {
            WatermarkContent::Image {
                overlay,
                scale_percent,
            } => {
                assert_eq!(overlay, "sources/logo.png");
                assert_eq!(scale_percent, 20);
            }
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let request = TransformRequest::Preset("gallery".into());
        let a = resolve(&request).unwrap().canonical_json();
        let b = resolve(&request).unwrap().canonical_json();
        assert_eq!(a, b);
    }
}
