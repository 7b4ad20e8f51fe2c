//! Built-in transform presets.
//!
//! Presets are expressed as option maps and resolved through the same path
//! as explicit options, so a preset and the equivalent hand-written options
//! always produce the same descriptor.

use std::collections::BTreeMap;

/// A named bundle of transform options.
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub options: &'static [(&'static str, &'static str)],
}

impl Preset {
    /// The preset's options as an owned map.
    pub fn option_map(&self) -> BTreeMap<String, String> {
        self.options
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

pub const PRESETS: &[Preset] = &[
    Preset {
        name: "web-optimized",
        description: "WebP at quality 85, bounded to 1920x1080",
        options: &[
            ("format", "webp"),
            ("quality", "85"),
            ("width", "1920"),
            ("height", "1080"),
            ("fit", "inside"),
        ],
    },
    Preset {
        name: "thumbnail",
        description: "300x300 centre-cropped WebP",
        options: &[
            ("format", "webp"),
            ("quality", "80"),
            ("width", "300"),
            ("height", "300"),
            ("fit", "cover"),
        ],
    },
    Preset {
        name: "social-media",
        description: "1200x630 JPEG for link previews",
        options: &[
            ("format", "jpeg"),
            ("quality", "90"),
            ("width", "1200"),
            ("height", "630"),
            ("fit", "cover"),
        ],
    },
    Preset {
        name: "print-quality",
        description: "Lossless PNG at source resolution",
        options: &[("format", "png"), ("quality", "100")],
    },
    Preset {
        name: "gallery",
        description: "WebP bounded to 1600px with small, medium and large thumbnails",
        options: &[
            ("format", "webp"),
            ("quality", "85"),
            ("width", "1600"),
            ("height", "1600"),
            ("fit", "inside"),
            ("thumbnails", "small,medium,large"),
        ],
    },
];

/// Look up a preset by name (case-insensitive).
pub fn find(name: &str) -> Option<&'static Preset> {
    let name = name.trim().to_ascii_lowercase();
    PRESETS.iter().find(|p| p.name == name)
}
