//! Bundle container reader
//!
//! Reads the object table eagerly and pixel payloads lazily, so index sync
//! never has to decompress image data.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use image::RgbaImage;

use super::{DecodedImage, MAGIC, MAX_OBJECTS, MAX_VERSION, MIN_VERSION, ObjectEntry};
use crate::error::{Error, Result};

/// Reader over a single bundle file
pub struct BundleReader<R: Read + Seek> {
    reader: BufReader<R>,
    path: PathBuf,
    name: String,
    version: u32,
    len: u64,
    entries: Vec<ObjectEntry>,
}

impl BundleReader<File> {
    /// Open a bundle file and read its object table
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the header/table is invalid.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::new(file, path)
    }
}

impl<R: Read + Seek> BundleReader<R> {
    /// Create a reader from any `Read + Seek` source.
    ///
    /// `path` is used for the bundle name (its stem) and for error messages.
    ///
    /// # Errors
    /// Returns an error if the header or object table is invalid.
    pub fn new(reader: R, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut this = Self {
            reader: BufReader::new(reader),
            path,
            name,
            version: 0,
            len: 0,
            entries: Vec::new(),
        };
        this.read_header_and_table()?;
        Ok(this)
    }

    /// Bundle name (file stem)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container format version
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// All entries of the object table, in file order
    #[must_use]
    pub fn entries(&self) -> &[ObjectEntry] {
        &self.entries
    }

    fn corrupt(&self, message: impl Into<String>) -> Error {
        Error::BundleCorrupt {
            bundle: self.name.clone(),
            message: message.into(),
        }
    }

    fn truncated(&self, what: &str, e: std::io::Error) -> Error {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            self.corrupt(format!("{what} truncated"))
        } else {
            Error::Io(e)
        }
    }

    fn read_header_and_table(&mut self) -> Result<()> {
        self.len = self.reader.seek(SeekFrom::End(0))?;
        self.reader.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        if let Err(e) = self.reader.read_exact(&mut magic) {
            return Err(self.truncated("header", e));
        }
        if magic != MAGIC {
            return Err(Error::InvalidBundleMagic {
                path: self.path.clone(),
                found: magic,
            });
        }

        let version = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| self.truncated("header", e))?;
        if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
            return Err(Error::UnsupportedBundleVersion {
                version,
                min: MIN_VERSION,
                max: MAX_VERSION,
            });
        }
        self.version = version;

        let count = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| self.truncated("header", e))? as usize;
        if count > MAX_OBJECTS {
            return Err(self.corrupt(format!("object table too large: {count} entries")));
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let entry = self
                .read_entry()
                .map_err(|e| match e {
                    Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                        self.corrupt(format!("object table truncated at entry {i}"))
                    }
                    other => other,
                })?;
            entries.push(entry);
        }
        self.entries = entries;
        Ok(())
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.reader.read_u16::<LittleEndian>()? as usize;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|e| self.corrupt(format!("invalid UTF-8 string: {e}")))
    }

    fn read_entry(&mut self) -> Result<ObjectEntry> {
        let kind_tag = self.reader.read_u8()?;
        let path_id = self.reader.read_i64::<LittleEndian>()?;
        let name = self.read_string()?;
        let container = self.read_string()?;
        let width = self.reader.read_u32::<LittleEndian>()?;
        let height = self.reader.read_u32::<LittleEndian>()?;
        let offset = self.reader.read_u64::<LittleEndian>()?;
        let size_compressed = self.reader.read_u32::<LittleEndian>()?;
        let size_raw = self.reader.read_u32::<LittleEndian>()?;

        Ok(ObjectEntry {
            kind_tag,
            path_id,
            name,
            container,
            width,
            height,
            offset,
            size_compressed,
            size_raw,
        })
    }

    /// Decompress the RGBA8 pixels of one entry
    ///
    /// # Errors
    /// Returns an error if the payload cannot be read or does not match the
    /// declared dimensions.
    pub fn read_pixels(&mut self, entry: &ObjectEntry) -> Result<RgbaImage> {
        let expected = u64::from(entry.width) * u64::from(entry.height) * 4;
        if u64::from(entry.size_raw) != expected {
            return Err(self.corrupt(format!(
                "payload of {} is {} bytes, expected {expected} for {}x{}",
                entry.path_id, entry.size_raw, entry.width, entry.height
            )));
        }

        let end = entry.offset.checked_add(u64::from(entry.size_compressed));
        if end.is_none_or(|end| end > self.len) {
            return Err(self.corrupt(format!(
                "payload of {} ({} bytes at {}) runs past the end of the file",
                entry.path_id, entry.size_compressed, entry.offset
            )));
        }
        // LZ4 cannot expand a block more than 255x
        if u64::from(entry.size_raw) > u64::from(entry.size_compressed) * 255 + 16 {
            return Err(self.corrupt(format!(
                "payload of {} claims {} raw bytes from {} compressed",
                entry.path_id, entry.size_raw, entry.size_compressed
            )));
        }

        self.reader.seek(SeekFrom::Start(entry.offset))?;
        let mut compressed = vec![0u8; entry.size_compressed as usize];
        self.reader.read_exact(&mut compressed)?;

        let raw = lz4_flex::block::decompress(&compressed, entry.size_raw as usize).map_err(|e| {
            Error::Lz4DecompressionFailed {
                message: format!("{} (path_id {}): {e}", self.name, entry.path_id),
            }
        })?;

        RgbaImage::from_raw(entry.width, entry.height, raw)
            .ok_or_else(|| self.corrupt(format!("pixel buffer mismatch for {}", entry.path_id)))
    }

    /// Decode an image entry into a [`DecodedImage`].
    ///
    /// # Errors
    /// Returns [`Error::ObjectNotFound`] if the entry is not an image object,
    /// or any error from [`read_pixels`](Self::read_pixels).
    pub fn decode(&mut self, entry: &ObjectEntry) -> Result<DecodedImage> {
        let kind = entry.image_kind().ok_or_else(|| Error::ObjectNotFound {
            bundle: self.name.clone(),
            path_id: entry.path_id,
        })?;
        let pixels = self.read_pixels(entry)?;

        Ok(DecodedImage {
            path_id: entry.path_id,
            name: entry.name.clone(),
            kind,
            bundle: self.name.clone(),
            container: entry.container.clone(),
            pixels,
        })
    }
}
