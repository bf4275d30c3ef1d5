//! Persistent asset index
//!
//! SQLite catalog mapping object path ids to the bundle that holds them,
//! kept in step with the corpus by [`AssetIndex::sync`]. Unchanged bundles
//! (same name and byte size) are never re-parsed.

mod sync;

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;

use crate::bundle::{BUNDLE_EXTENSION, ImageKind};
use crate::error::{Error, Result};

pub use sync::SyncStats;

/// Maximum number of ids bound into a single `IN (...)` query
pub const LOOKUP_CHUNK_SIZE: usize = 1000;

/// Columns every `image` table must have
const IMAGE_COLUMNS: [&str; 8] = [
    "id", "path_id", "name", "kind", "width", "height", "bundle", "container",
];

const IMAGE_FIELDS: &str = "path_id, name, kind, width, height, bundle, container";

/// One indexed image object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub path_id: i64,
    pub name: String,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    /// Owning bundle name
    pub bundle: String,
    pub container: String,
}

impl ImageRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tag: u8 = row.get(2)?;
        let kind = ImageKind::from_tag(tag).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Integer,
                format!("unknown image kind {tag}").into(),
            )
        })?;
        Ok(Self {
            path_id: row.get(0)?,
            name: row.get(1)?,
            kind,
            width: row.get(3)?,
            height: row.get(4)?,
            bundle: row.get(5)?,
            container: row.get(6)?,
        })
    }
}

/// The asset index database
pub struct AssetIndex {
    conn: Connection,
    db_path: PathBuf,
    bundle_dir: PathBuf,
}

impl AssetIndex {
    /// Open (or create) the index database at `db_path` for bundles in `bundle_dir`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened, or
    /// [`Error::IndexCorruption`] if an existing schema does not match.
    pub fn open(db_path: impl AsRef<Path>, bundle_dir: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        tracing::info!("Asset index: {}", db_path.display());

        let mut index = Self {
            conn,
            db_path,
            bundle_dir: bundle_dir.as_ref().to_path_buf(),
        };
        index.init_schema()?;
        Ok(index)
    }

    /// Open a throwaway in-memory index
    ///
    /// # Errors
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory(bundle_dir: impl AsRef<Path>) -> Result<Self> {
        let mut index = Self {
            conn: Connection::open_in_memory()?,
            db_path: PathBuf::from(":memory:"),
            bundle_dir: bundle_dir.as_ref().to_path_buf(),
        };
        index.init_schema()?;
        Ok(index)
    }

    /// Create tables and indexes if they don't exist, then verify the layout.
    fn init_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bundle (
                name    TEXT PRIMARY KEY,
                size    INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS image (
                id          INTEGER PRIMARY KEY,
                path_id     INTEGER NOT NULL,
                name        TEXT NOT NULL,
                kind        INTEGER NOT NULL,
                width       INTEGER NOT NULL,
                height      INTEGER NOT NULL,
                bundle      TEXT NOT NULL,
                container   TEXT NOT NULL
            );",
        )?;

        let mut stmt = self.conn.prepare("SELECT name FROM pragma_table_info('image')")?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let missing: Vec<&str> = IMAGE_COLUMNS
            .iter()
            .copied()
            .filter(|c| !columns.iter().any(|have| have == c))
            .collect();
        if !missing.is_empty() {
            return Err(Error::IndexCorruption {
                path: self.db_path.clone(),
                message: format!("image table lacks columns: {}", missing.join(", ")),
            });
        }

        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_image_path_id ON image (path_id);
            CREATE INDEX IF NOT EXISTS idx_image_bundle ON image (bundle);
            CREATE INDEX IF NOT EXISTS idx_image_name ON image (name);",
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Path of the database file (`:memory:` for in-memory indexes)
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Number of indexed bundles
    pub fn bundle_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM bundle", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of indexed image records
    pub fn image_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM image", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All indexed `(name, size)` pairs
    pub fn indexed_bundles(&self) -> Result<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare("SELECT name, size FROM bundle ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Look up every record of `kind` whose path id is in `ids`.
    ///
    /// Queries are issued in chunks of [`LOOKUP_CHUNK_SIZE`] ids so the
    /// statement size stays bounded whatever the input size.
    pub fn lookup_by_path_ids(&self, ids: &[i64], kind: ImageKind) -> Result<Vec<ImageRecord>> {
        let mut records = Vec::new();
        for chunk in ids.chunks(LOOKUP_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {IMAGE_FIELDS} FROM image WHERE kind = {} AND path_id IN ({placeholders})",
                kind.tag()
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), ImageRecord::from_row)?;
            for row in rows {
                records.push(row?);
            }
        }
        Ok(records)
    }

    /// Find one record by exact object name
    pub fn find_by_name(&self, name: &str, kind: ImageKind) -> Result<Option<ImageRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {IMAGE_FIELDS} FROM image WHERE name = ?1 AND kind = ?2 ORDER BY bundle LIMIT 1"),
                params![name, kind.tag()],
                ImageRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Find one record by path id
    pub fn find_by_path_id(&self, path_id: i64, kind: ImageKind) -> Result<Option<ImageRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {IMAGE_FIELDS} FROM image WHERE path_id = ?1 AND kind = ?2 ORDER BY bundle LIMIT 1"),
                params![path_id, kind.tag()],
                ImageRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Every Texture2D whose name ends in `_alpha` (any case)
    pub fn alpha_textures(&self) -> Result<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {IMAGE_FIELDS} FROM image
             WHERE kind = ?1 AND lower(name) LIKE '%\\_alpha' ESCAPE '\\'
             ORDER BY name, bundle"
        ))?;
        let rows = stmt
            .query_map(params![ImageKind::Texture2D.tag()], ImageRecord::from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Every record of one bundle, in path id order
    pub fn records_in_bundle(&self, bundle: &str) -> Result<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {IMAGE_FIELDS} FROM image WHERE bundle = ?1 ORDER BY path_id, kind"
        ))?;
        let rows = stmt
            .query_map(params![bundle], ImageRecord::from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Path of an indexed bundle file
    ///
    /// # Errors
    /// Returns [`Error::BundleNotIndexed`] if the bundle is not in the index.
    pub fn resolve_bundle_path(&self, name: &str) -> Result<PathBuf> {
        let known: Option<String> = self
            .conn
            .query_row("SELECT name FROM bundle WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        match known {
            Some(_) => Ok(self.bundle_dir.join(format!("{name}.{BUNDLE_EXTENSION}"))),
            None => Err(Error::BundleNotIndexed(name.to_string())),
        }
    }
}

impl std::fmt::Debug for AssetIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetIndex")
            .field("db_path", &self.db_path)
            .field("bundle_dir", &self.bundle_dir)
            .finish()
    }
}
