//! Transform specification: descriptors, presets, and resolution.

pub mod descriptor;
pub mod preset;
pub mod resolve;

pub use descriptor::{
    BlendMode, FitMode, OutputFormat, ThumbnailPreset, TransformDescriptor, Watermark,
    WatermarkContent, WatermarkPosition,
};
pub use preset::{Preset, PRESETS};
pub use resolve::{TransformRequest, TransformResolver};
