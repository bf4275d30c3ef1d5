//! Types for bundle container handling

use std::path::PathBuf;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// The two image object kinds the extractor cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImageKind {
    Texture2D,
    Sprite,
}

impl ImageKind {
    /// Parse an image kind from an object table tag.
    ///
    /// Returns `None` for object kinds that are not images.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ImageKind::Texture2D),
            1 => Some(ImageKind::Sprite),
            _ => None,
        }
    }

    /// Tag written to the object table and the `kind` index column
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            ImageKind::Texture2D => 0,
            ImageKind::Sprite => 1,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Texture2D => "Texture2D",
            ImageKind::Sprite => "Sprite",
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A bundle file discovered in the corpus directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// File stem, the bundle's identity
    pub name: String,
    /// Size in bytes, used as the change-detection signal
    pub size: u64,
    /// Full path on disk
    pub path: PathBuf,
}

/// Entry in a bundle's object table
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    /// Raw kind tag (0 = Texture2D, 1 = Sprite, anything else is ignored)
    pub kind_tag: u8,
    /// Object identifier
    pub path_id: i64,
    /// Human-readable object name
    pub name: String,
    /// Container path the object was packed from (may be empty)
    pub container: String,
    /// Pixel width
    pub width: u32,
    /// Pixel height
    pub height: u32,
    /// Absolute offset of the compressed payload
    pub(crate) offset: u64,
    /// Size of the LZ4 block
    pub(crate) size_compressed: u32,
    /// Size of the raw RGBA8 data
    pub(crate) size_raw: u32,
}

impl ObjectEntry {
    /// Image kind of this object, if it is an image at all
    #[must_use]
    pub fn image_kind(&self) -> Option<ImageKind> {
        ImageKind::from_tag(self.kind_tag)
    }
}

/// An image object decoded from a bundle, pixels included.
///
/// Decoded images are created once during resolution and only ever shared
/// behind `Arc` afterwards.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub path_id: i64,
    pub name: String,
    pub kind: ImageKind,
    /// Name of the bundle the object was read from
    pub bundle: String,
    pub container: String,
    pub pixels: RgbaImage,
}

impl DecodedImage {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Whether any pixel is less than fully opaque.
    ///
    /// This is a real scan of the alpha channel; a fully opaque RGBA image
    /// counts as having no transparency.
    #[must_use]
    pub fn has_transparency(&self) -> bool {
        self.pixels.pixels().any(|p| p.0[3] < u8::MAX)
    }

    /// Whether the name carries the `_alpha` mask suffix (case-insensitive)
    #[must_use]
    pub fn is_alpha_mask(&self) -> bool {
        crate::alpha::is_alpha_name(&self.name)
    }
}
