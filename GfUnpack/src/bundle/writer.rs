//! Bundle container writer

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use image::RgbaImage;

use super::{ImageKind, MAGIC, MAX_VERSION};
use crate::error::{Error, Result};

/// Object tag for non-image objects
const OTHER_KIND_TAG: u8 = 2;

/// Fixed-size part of a table entry (everything except the two strings)
const ENTRY_FIXED_SIZE: u64 = 1 + 8 + 2 + 2 + 4 + 4 + 8 + 4 + 4;

/// Size of magic + version + object count
const HEADER_SIZE: u64 = 4 + 4 + 4;

/// Object queued for writing
struct PendingObject {
    kind_tag: u8,
    path_id: i64,
    name: String,
    container: String,
    width: u32,
    height: u32,
    /// LZ4 block of the RGBA8 pixels
    payload: Vec<u8>,
    size_raw: u32,
}

/// Builds a bundle file from in-memory images
#[derive(Default)]
pub struct BundleWriter {
    objects: Vec<PendingObject>,
}

impl BundleWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an image object
    pub fn add_image(
        &mut self,
        kind: ImageKind,
        path_id: i64,
        name: impl Into<String>,
        container: impl Into<String>,
        image: &RgbaImage,
    ) -> &mut Self {
        let raw = image.as_raw();
        self.objects.push(PendingObject {
            kind_tag: kind.tag(),
            path_id,
            name: name.into(),
            container: container.into(),
            width: image.width(),
            height: image.height(),
            payload: lz4_flex::block::compress(raw),
            size_raw: raw.len() as u32,
        });
        self
    }

    /// Queue a non-image object (skipped by every reader path that wants images)
    pub fn add_other(
        &mut self,
        path_id: i64,
        name: impl Into<String>,
        container: impl Into<String>,
    ) -> &mut Self {
        self.objects.push(PendingObject {
            kind_tag: OTHER_KIND_TAG,
            path_id,
            name: name.into(),
            container: container.into(),
            width: 0,
            height: 0,
            payload: Vec::new(),
            size_raw: 0,
        });
        self
    }

    /// Number of queued objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn table_size(&self) -> Result<u64> {
        let mut size = 0u64;
        for obj in &self.objects {
            for s in [&obj.name, &obj.container] {
                if s.len() > u16::MAX as usize {
                    return Err(Error::BundleCorrupt {
                        bundle: String::new(),
                        message: format!("string too long for object {}: {} bytes", obj.path_id, s.len()),
                    });
                }
            }
            size += ENTRY_FIXED_SIZE + obj.name.len() as u64 + obj.container.len() as u64;
        }
        Ok(size)
    }

    /// Serialize the bundle to a writer
    ///
    /// # Errors
    /// Returns an error if a string is too long for the table or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut offset = HEADER_SIZE + self.table_size()?;

        writer.write_all(&MAGIC)?;
        writer.write_u32::<LittleEndian>(MAX_VERSION)?;
        writer.write_u32::<LittleEndian>(self.objects.len() as u32)?;

        for obj in &self.objects {
            writer.write_u8(obj.kind_tag)?;
            writer.write_i64::<LittleEndian>(obj.path_id)?;
            writer.write_u16::<LittleEndian>(obj.name.len() as u16)?;
            writer.write_all(obj.name.as_bytes())?;
            writer.write_u16::<LittleEndian>(obj.container.len() as u16)?;
            writer.write_all(obj.container.as_bytes())?;
            writer.write_u32::<LittleEndian>(obj.width)?;
            writer.write_u32::<LittleEndian>(obj.height)?;
            writer.write_u64::<LittleEndian>(offset)?;
            writer.write_u32::<LittleEndian>(obj.payload.len() as u32)?;
            writer.write_u32::<LittleEndian>(obj.size_raw)?;
            offset += obj.payload.len() as u64;
        }

        for obj in &self.objects {
            writer.write_all(&obj.payload)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the bundle to a file, creating parent directories as needed
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleReader;
    use image::Rgba;
    use std::io::Cursor;

    #[test]
    fn test_written_table_is_readable() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        let mut writer = BundleWriter::new();
        writer
            .add_image(ImageKind::Texture2D, 10, "foo", "assets/characters/foo/pic/foo.png", &img)
            .add_other(5, "holder", "")
            .add_image(ImageKind::Sprite, -7, "foo", "", &img);

        let mut buf = Vec::new();
        writer.write_to(&mut buf).unwrap();

        let mut reader = BundleReader::new(Cursor::new(buf), "B1.ab").unwrap();
        assert_eq!(reader.name(), "B1");
        assert_eq!(reader.entries().len(), 3);
        assert_eq!(reader.entries()[1].image_kind(), None);

        let sprite = reader.entries()[2].clone();
        let decoded = reader.decode(&sprite).unwrap();
        assert_eq!(decoded.kind, ImageKind::Sprite);
        assert_eq!(decoded.path_id, -7);
        assert_eq!(decoded.pixels, img);
        assert!(!decoded.has_transparency());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let err = BundleReader::new(Cursor::new(b"UnityFS\0\0\0\0\0".to_vec()), "x.ab")
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidBundleMagic { .. }));
    }

    #[test]
    fn test_truncated_table_is_corrupt() {
        let img = RgbaImage::new(1, 1);
        let mut writer = BundleWriter::new();
        writer.add_image(ImageKind::Texture2D, 1, "a", "", &img);
        let mut buf = Vec::new();
        writer.write_to(&mut buf).unwrap();
        buf.truncate(20);

        let err = BundleReader::new(Cursor::new(buf), "t.ab").err().unwrap();
        assert!(matches!(err, Error::BundleCorrupt { .. }));
    }

    #[test]
    fn test_short_file_is_corrupt() {
        let err = BundleReader::new(Cursor::new(b"GF".to_vec()), "s.ab").err().unwrap();
        assert!(matches!(err, Error::BundleCorrupt { .. }));
    }

    #[test]
    fn test_payload_past_end_is_corrupt() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let mut writer = BundleWriter::new();
        writer.add_image(ImageKind::Texture2D, 1, "a", "", &img);
        let mut buf = Vec::new();
        writer.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 1);

        let mut reader = BundleReader::new(Cursor::new(buf), "p.ab").unwrap();
        let entry = reader.entries()[0].clone();
        let err = reader.read_pixels(&entry).unwrap_err();
        assert!(matches!(err, Error::BundleCorrupt { .. }));
    }

    #[test]
    fn test_oversized_raw_claim_is_corrupt() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 255]));
        let mut writer = BundleWriter::new();
        writer.add_image(ImageKind::Texture2D, 1, "a", "", &img);
        let mut buf = Vec::new();
        writer.write_to(&mut buf).unwrap();

        let mut reader = BundleReader::new(Cursor::new(buf), "o.ab").unwrap();
        let mut entry = reader.entries()[0].clone();
        entry.width = 30_000;
        entry.height = 30_000;
        entry.size_raw = 30_000 * 30_000 * 4;
        let err = reader.read_pixels(&entry).unwrap_err();
        assert!(matches!(err, Error::BundleCorrupt { .. }));
    }
}
