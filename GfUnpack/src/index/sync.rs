//! Incremental index synchronization

use std::collections::BTreeMap;

use rusqlite::params;
use serde::Serialize;

use super::AssetIndex;
use crate::bundle::BundleCorpus;
use crate::error::Result;

/// Counts reported by [`AssetIndex::sync`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Bundles that were new or changed size
    pub added: usize,
    /// Bundles that disappeared or changed size
    pub removed: usize,
    /// Bundles whose name and size matched the index
    pub unchanged: usize,
    pub records_inserted: usize,
    pub records_deleted: usize,
}

impl SyncStats {
    /// Whether the sync touched the database at all
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

impl AssetIndex {
    /// Bring the index in line with the bundles currently in `corpus`.
    ///
    /// Bundles are compared by `(name, size)`. A bundle whose size changed is
    /// removed and re-added. Everything happens in one transaction, so a
    /// failure while reading any bundle leaves the previous index intact.
    ///
    /// # Errors
    /// Returns an error if a new bundle cannot be read or the database
    /// rejects a write. The index is unchanged in that case.
    pub fn sync(&mut self, corpus: &BundleCorpus) -> Result<SyncStats> {
        let indexed: BTreeMap<String, u64> = self.indexed_bundles()?.into_iter().collect();

        let removed: Vec<&String> = indexed
            .iter()
            .filter(|(name, size)| corpus.get(name).is_none_or(|b| b.size != **size))
            .map(|(name, _)| name)
            .collect();
        let added: Vec<&str> = corpus
            .bundles()
            .filter(|b| indexed.get(&b.name) != Some(&b.size))
            .map(|b| b.name.as_str())
            .collect();

        let mut stats = SyncStats {
            added: added.len(),
            removed: removed.len(),
            unchanged: corpus.len() - added.len(),
            ..SyncStats::default()
        };
        if stats.is_noop() {
            tracing::debug!("Index up to date ({} bundles)", stats.unchanged);
            return Ok(stats);
        }

        tracing::info!(
            "Syncing index: {} added, {} removed, {} unchanged",
            stats.added,
            stats.removed,
            stats.unchanged
        );

        let tx = self.conn.transaction()?;

        for name in &removed {
            stats.records_deleted += tx.execute("DELETE FROM image WHERE bundle = ?1", params![name])?;
            tx.execute("DELETE FROM bundle WHERE name = ?1", params![name])?;
            tracing::debug!("Dropped bundle {name}");
        }

        {
            let mut insert_image = tx.prepare(
                "INSERT INTO image (path_id, name, kind, width, height, bundle, container)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut insert_bundle = tx.prepare("INSERT INTO bundle (name, size) VALUES (?1, ?2)")?;

            for name in &added {
                let mut count = 0;
                for entry in corpus.list_objects(name)? {
                    let Some(kind) = entry.image_kind() else {
                        continue;
                    };
                    insert_image.execute(params![
                        entry.path_id,
                        entry.name,
                        kind.tag(),
                        entry.width,
                        entry.height,
                        name,
                        entry.container,
                    ])?;
                    count += 1;
                }
                // corpus.get is always Some here since `added` came from the corpus
                let size = corpus.get(name).map_or(0, |b| b.size);
                insert_bundle.execute(params![name, size as i64])?;
                stats.records_inserted += count;
                tracing::debug!("Indexed bundle {name}: {count} images");
            }
        }

        tx.commit()?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleWriter, ImageKind};
    use crate::index::ImageRecord;
    use image::RgbaImage;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn write_bundle(dir: &Path, name: &str, ids: &[(i64, &str)]) {
        let img = RgbaImage::new(2, 2);
        let mut writer = BundleWriter::new();
        for (id, obj) in ids {
            writer.add_image(ImageKind::Texture2D, *id, *obj, "", &img);
        }
        writer.add_other(9999, "MonoBehaviour", "");
        writer.write_file(dir.join(format!("{name}.ab"))).unwrap();
    }

    fn all_records(index: &AssetIndex) -> Vec<ImageRecord> {
        let mut records = Vec::new();
        for (bundle, _) in index.indexed_bundles().unwrap() {
            records.extend(index.records_in_bundle(&bundle).unwrap());
        }
        records
    }

    #[test]
    fn test_second_sync_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "b1", &[(1, "a"), (2, "b")]);
        write_bundle(dir.path(), "b2", &[(3, "c")]);

        let mut index = AssetIndex::open_in_memory(dir.path()).unwrap();
        let corpus = BundleCorpus::scan(dir.path()).unwrap();

        let first = index.sync(&corpus).unwrap();
        assert_eq!(first.added, 2);
        assert_eq!(first.records_inserted, 3);
        assert_eq!(index.image_count().unwrap(), 3);

        let second = index.sync(&corpus).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.unchanged, 2);
    }

    #[test]
    fn test_changed_bundle_is_reindexed() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "b1", &[(1, "a")]);
        write_bundle(dir.path(), "b2", &[(3, "c")]);

        let mut index = AssetIndex::open_in_memory(dir.path()).unwrap();
        index.sync(&BundleCorpus::scan(dir.path()).unwrap()).unwrap();

        write_bundle(dir.path(), "b1", &[(1, "a"), (5, "longer_name")]);
        let corpus = BundleCorpus::scan(dir.path()).unwrap();
        let stats = index.sync(&corpus).unwrap();

        assert_eq!(stats.added, 1);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.records_deleted, 1);
        assert_eq!(stats.records_inserted, 2);

        let mut fresh = AssetIndex::open_in_memory(dir.path()).unwrap();
        fresh.sync(&corpus).unwrap();
        assert_eq!(all_records(&index), all_records(&fresh));
    }

    #[test]
    fn test_removed_bundle_records_disappear() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "b1", &[(1, "a")]);
        write_bundle(dir.path(), "b2", &[(3, "c")]);

        let mut index = AssetIndex::open_in_memory(dir.path()).unwrap();
        index.sync(&BundleCorpus::scan(dir.path()).unwrap()).unwrap();

        std::fs::remove_file(dir.path().join("b2.ab")).unwrap();
        let stats = index.sync(&BundleCorpus::scan(dir.path()).unwrap()).unwrap();
        assert_eq!(stats.removed, 1);
        assert!(index.find_by_path_id(3, ImageKind::Texture2D).unwrap().is_none());
        assert_eq!(index.bundle_count().unwrap(), 1);
    }

    #[test]
    fn test_failed_sync_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "b1", &[(1, "a")]);

        let mut index = AssetIndex::open_in_memory(dir.path()).unwrap();
        index.sync(&BundleCorpus::scan(dir.path()).unwrap()).unwrap();

        std::fs::remove_file(dir.path().join("b1.ab")).unwrap();
        std::fs::write(dir.path().join("broken.ab"), b"not a bundle").unwrap();
        assert!(index.sync(&BundleCorpus::scan(dir.path()).unwrap()).is_err());

        assert_eq!(index.bundle_count().unwrap(), 1);
        assert!(index.find_by_path_id(1, ImageKind::Texture2D).unwrap().is_some());
    }
}
