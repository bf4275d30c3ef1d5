//! Bundle corpus and container format
//!
//! A corpus is a flat directory of `*.ab` bundle files. Each bundle holds an
//! object table (kind, path id, name, container path, dimensions) followed
//! by LZ4-compressed RGBA8 payloads.

mod reader;
mod types;
mod writer;

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

pub use reader::BundleReader;
pub use types::*;
pub use writer::BundleWriter;

/// Bundle magic bytes
pub const MAGIC: [u8; 4] = [b'G', b'F', b'A', b'B'];

/// Minimum supported container version
pub const MIN_VERSION: u32 = 1;

/// Maximum supported container version
pub const MAX_VERSION: u32 = 1;

/// Upper bound on object table length
pub const MAX_OBJECTS: usize = 1 << 20;

/// File extension of bundle files
pub const BUNDLE_EXTENSION: &str = "ab";

/// The set of bundle files in one directory
#[derive(Debug, Clone)]
pub struct BundleCorpus {
    root: PathBuf,
    bundles: BTreeMap<String, Bundle>,
}

impl BundleCorpus {
    /// Enumerate the bundles in a directory (non-recursive)
    ///
    /// # Errors
    /// Returns [`Error::CorpusNotFound`] if `dir` is not a directory, or an IO
    /// error if a bundle's metadata cannot be read.
    pub fn scan(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::CorpusNotFound { path: root });
        }

        let mut bundles = BTreeMap::new();
        for entry in WalkDir::new(&root).min_depth(1).max_depth(1).follow_links(true) {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file()
                || !path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(BUNDLE_EXTENSION))
            {
                continue;
            }
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            let size = entry.metadata()?.len();
            bundles.insert(
                name.clone(),
                Bundle {
                    name,
                    size,
                    path: path.to_path_buf(),
                },
            );
        }

        tracing::debug!("Found {} bundles in {}", bundles.len(), root.display());
        Ok(Self { root, bundles })
    }

    /// Directory the corpus was scanned from
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bundles in name order
    pub fn bundles(&self) -> impl Iterator<Item = &Bundle> {
        self.bundles.values()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Bundle> {
        self.bundles.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Open a reader over a named bundle
    ///
    /// # Errors
    /// Returns [`Error::BundleNotFound`] for unknown names, or any reader error.
    pub fn open(&self, name: &str) -> Result<BundleReader<File>> {
        let bundle = self
            .bundles
            .get(name)
            .ok_or_else(|| Error::BundleNotFound(name.to_string()))?;
        BundleReader::open(&bundle.path)
    }

    /// Read a bundle's object table without decoding any pixels
    ///
    /// # Errors
    /// Returns an error if the bundle cannot be opened or its table is invalid.
    pub fn list_objects(&self, name: &str) -> Result<Vec<ObjectEntry>> {
        Ok(self.open(name)?.entries().to_vec())
    }

    /// Decode every image object of a bundle accepted by `filter`
    ///
    /// # Errors
    /// Returns an error if the bundle or any selected payload cannot be read.
    pub fn decode_images<F>(&self, name: &str, filter: F) -> Result<Vec<DecodedImage>>
    where
        F: Fn(&ObjectEntry) -> bool,
    {
        let mut reader = self.open(name)?;
        let selected: Vec<ObjectEntry> = reader
            .entries()
            .iter()
            .filter(|e| e.image_kind().is_some() && filter(e))
            .cloned()
            .collect();

        selected.iter().map(|entry| reader.decode(entry)).collect()
    }

    /// Decode a single image object by path id and kind
    ///
    /// # Errors
    /// Returns [`Error::ObjectNotFound`] if the bundle has no such object.
    pub fn decode_image(&self, name: &str, path_id: i64, kind: ImageKind) -> Result<DecodedImage> {
        let mut reader = self.open(name)?;
        let entry = reader
            .entries()
            .iter()
            .find(|e| e.path_id == path_id && e.image_kind() == Some(kind))
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound {
                bundle: name.to_string(),
                path_id,
            })?;
        reader.decode(&entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use tempfile::tempdir;

    #[test]
    fn test_scan_only_picks_bundle_files() {
        let dir = tempdir().unwrap();
        let img = RgbaImage::new(2, 2);
        let mut writer = BundleWriter::new();
        writer.add_image(ImageKind::Texture2D, 1, "a", "", &img);
        writer.write_file(dir.path().join("characterfoo.ab")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested.ab")).unwrap();

        let corpus = BundleCorpus::scan(dir.path()).unwrap();
        assert_eq!(corpus.len(), 1);
        let bundle = corpus.get("characterfoo").unwrap();
        assert_eq!(bundle.size, std::fs::metadata(&bundle.path).unwrap().len());
    }

    #[test]
    fn test_scan_missing_directory() {
        let dir = tempdir().unwrap();
        let err = BundleCorpus::scan(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::CorpusNotFound { .. }));
    }

    #[test]
    fn test_decode_single_image() {
        let dir = tempdir().unwrap();
        let img = RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 0]));
        let mut writer = BundleWriter::new();
        writer
            .add_image(ImageKind::Texture2D, 10, "foo", "", &img)
            .add_image(ImageKind::Sprite, 10, "foo", "", &img);
        writer.write_file(dir.path().join("b1.ab")).unwrap();

        let corpus = BundleCorpus::scan(dir.path()).unwrap();
        let sprite = corpus.decode_image("b1", 10, ImageKind::Sprite).unwrap();
        assert_eq!(sprite.kind, ImageKind::Sprite);
        assert!(sprite.has_transparency());

        let err = corpus.decode_image("b1", 11, ImageKind::Sprite).unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound { path_id: 11, .. }));
    }
}
