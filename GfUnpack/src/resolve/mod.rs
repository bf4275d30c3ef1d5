//! Resolution of required path ids to decoded images
//!
//! Only bundles that contain at least one required object are opened. Each
//! opened bundle also contributes its `_alpha` textures to the run's
//! [`ImageGroup`], so most masks are found without a second decode.

mod descriptor;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::alpha::{ImageGroup, color_name_for, is_alpha_name};
use crate::bundle::{BundleCorpus, DecodedImage, ImageKind};
use crate::config::BundlePrecedence;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::{Error, Result};
use crate::index::AssetIndex;
use crate::progress::{ExtractPhase, ExtractProgress, ProgressCallback};

pub use descriptor::{RequiredImageDescriptor, RequirementSet};

/// Output of a resolution pass; read-only once built
#[derive(Debug, Default)]
pub struct ResolvedImages {
    images: BTreeMap<i64, Arc<DecodedImage>>,
    group: ImageGroup,
    /// Number of bundles decoded
    pub bundles_decoded: usize,
    /// `ResolutionGap` and `InvalidPathId` diagnostics
    pub diagnostics: Diagnostics,
}

impl ResolvedImages {
    #[must_use]
    pub fn get(&self, path_id: i64) -> Option<&Arc<DecodedImage>> {
        self.images.get(&path_id)
    }

    #[must_use]
    pub fn contains(&self, path_id: i64) -> bool {
        self.images.contains_key(&path_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Masks decoded from the opened bundles
    #[must_use]
    pub fn group(&self) -> &ImageGroup {
        &self.group
    }

    /// Take the mask group, leaving an empty one behind
    pub fn take_group(&mut self) -> ImageGroup {
        std::mem::take(&mut self.group)
    }
}

/// Decodes the minimum set of bundles covering a [`RequirementSet`]
pub struct ResolutionEngine<'a> {
    index: &'a AssetIndex,
    corpus: &'a BundleCorpus,
    precedence: &'a BundlePrecedence,
}

impl<'a> ResolutionEngine<'a> {
    #[must_use]
    pub fn new(index: &'a AssetIndex, corpus: &'a BundleCorpus, precedence: &'a BundlePrecedence) -> Self {
        Self {
            index,
            corpus,
            precedence,
        }
    }

    /// Resolve every path id of `requirements`.
    ///
    /// Missing ids are reported as diagnostics, not errors. The one hard
    /// failure is a path id of one kind found in two bundles of equal precedence.
    ///
    /// # Errors
    /// Returns [`Error::AmbiguousPathId`] on an unresolvable collision, or
    /// any index/bundle read error.
    pub fn resolve(&self, requirements: &RequirementSet, progress: ProgressCallback) -> Result<ResolvedImages> {
        let mut resolved = ResolvedImages::default();

        for d in requirements.descriptors() {
            if d.color_path_id == 0 {
                resolved.diagnostics.report(
                    DiagnosticKind::InvalidPathId,
                    d.key(),
                    "descriptor has no color path id",
                );
            }
        }

        let ids: Vec<i64> = requirements.ids().iter().copied().collect();
        let mut bundles = BTreeSet::new();
        for kind in [ImageKind::Texture2D, ImageKind::Sprite] {
            for record in self.index.lookup_by_path_ids(&ids, kind)? {
                bundles.insert(record.bundle);
            }
        }
        tracing::info!("Resolving {} path ids from {} bundles", ids.len(), bundles.len());

        let decoded = self.decode_bundles(&bundles, requirements.ids(), progress)?;
        resolved.bundles_decoded = decoded.len();

        // Bundles arrive in name order, so collisions resolve the same way every run.
        // Precedence only applies between copies of the same kind.
        let mut owned: BTreeMap<(i64, ImageKind), (String, Arc<DecodedImage>)> = BTreeMap::new();
        for (bundle, images) in decoded {
            for image in images {
                let image = Arc::new(image);
                if image.kind == ImageKind::Texture2D && is_alpha_name(&image.name) {
                    resolved.group.insert(Arc::clone(&image));
                }
                if !requirements.ids().contains(&image.path_id) {
                    continue;
                }
                let key = (image.path_id, image.kind);
                if let Some((existing, _)) = owned.get(&key) {
                    match self.precedence.rank(&bundle).cmp(&self.precedence.rank(existing)) {
                        std::cmp::Ordering::Greater => {
                            tracing::debug!(
                                "path_id {} from {bundle} replaces the copy in {existing}",
                                image.path_id
                            );
                        }
                        std::cmp::Ordering::Less => continue,
                        std::cmp::Ordering::Equal => {
                            return Err(Error::AmbiguousPathId {
                                path_id: image.path_id,
                                first: existing.clone(),
                                second: bundle.clone(),
                            });
                        }
                    }
                }
                owned.insert(key, (bundle.clone(), image));
            }
        }

        // A Sprite shadows a Texture2D with the same path id
        for ((path_id, kind), (_, image)) in owned {
            if kind == ImageKind::Sprite || !resolved.images.contains_key(&path_id) {
                resolved.images.insert(path_id, image);
            }
        }

        self.recover_colors(requirements, &mut resolved)?;
        Self::report_gaps(requirements, &mut resolved);
        Ok(resolved)
    }

    fn decode_bundles(
        &self,
        bundles: &BTreeSet<String>,
        ids: &BTreeSet<i64>,
        progress: ProgressCallback,
    ) -> Result<Vec<(String, Vec<DecodedImage>)>> {
        let total = bundles.len();
        let processed = AtomicUsize::new(0);
        let names: Vec<&String> = bundles.iter().collect();
        // The index connection is not Sync; only the corpus crosses threads
        let corpus = self.corpus;

        // collect() on an indexed parallel iterator keeps input order
        names
            .par_iter()
            .map(|name| {
                let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
                progress(&ExtractProgress::with_item(
                    ExtractPhase::DecodingBundles,
                    current,
                    total,
                    name.as_str(),
                ));
                let images = corpus.decode_images(name, |entry| {
                    ids.contains(&entry.path_id)
                        || (entry.image_kind() == Some(ImageKind::Texture2D) && is_alpha_name(&entry.name))
                })?;
                tracing::debug!("Decoded {} images from {name}", images.len());
                Ok::<_, Error>(((*name).clone(), images))
            })
            .collect()
    }

    /// Fill in color images that are missing but whose alpha resolved.
    ///
    /// A resolved mask leads to its color texture by name. A resolved
    /// non-mask is a color image with its alpha already merged in.
    fn recover_colors(&self, requirements: &RequirementSet, resolved: &mut ResolvedImages) -> Result<()> {
        for d in requirements.descriptors() {
            if d.color_path_id == 0 || resolved.contains(d.color_path_id) || !d.has_alpha() {
                continue;
            }
            let Some(alpha) = resolved.get(d.alpha_path_id).cloned() else {
                continue;
            };

            let Some(color_name) = color_name_for(&alpha.name) else {
                tracing::debug!("{}: alpha {} is a merged color image", d.key(), alpha.name);
                resolved.images.insert(d.color_path_id, alpha);
                continue;
            };

            let record = match self.index.find_by_name(color_name, ImageKind::Texture2D)? {
                Some(record) => Some(record),
                None => self.index.find_by_name(color_name, ImageKind::Sprite)?,
            };
            if let Some(record) = record {
                let color = self.corpus.decode_image(&record.bundle, record.path_id, record.kind)?;
                tracing::debug!("{}: recovered color {} from {}", d.key(), color.name, record.bundle);
                resolved.images.insert(d.color_path_id, Arc::new(color));
            }
        }
        Ok(())
    }

    fn report_gaps(requirements: &RequirementSet, resolved: &mut ResolvedImages) {
        for &id in requirements.ids() {
            if resolved.contains(id) {
                continue;
            }
            // An alpha-only id is fine when every color it pairs with already carries alpha
            let alpha_only = !requirements.is_color_id(id)
                && requirements
                    .referencing_alpha(id)
                    .all(|d| resolved.get(d.color_path_id).is_some_and(|c| c.has_transparency()));
            if alpha_only {
                continue;
            }
            resolved.diagnostics.report(
                DiagnosticKind::ResolutionGap,
                id.to_string(),
                "path id is not in any indexed bundle",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleWriter;
    use image::{Rgba, RgbaImage};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn noop(_: &ExtractProgress) {}

    fn write(dir: &Path, bundle: &str, objects: &[(i64, &str)]) {
        let img = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        let mut writer = BundleWriter::new();
        for (id, name) in objects {
            writer.add_image(ImageKind::Texture2D, *id, *name, "", &img);
        }
        writer.write_file(dir.join(format!("{bundle}.ab"))).unwrap();
    }

    fn setup(dir: &Path) -> (AssetIndex, BundleCorpus) {
        let corpus = BundleCorpus::scan(dir).unwrap();
        let mut index = AssetIndex::open_in_memory(dir).unwrap();
        index.sync(&corpus).unwrap();
        (index, corpus)
    }

    #[test]
    fn test_only_needed_bundles_are_decoded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b1", &[(10, "foo"), (11, "foo_alpha"), (12, "bar_alpha")]);
        write(dir.path(), "b2", &[(20, "unrelated")]);
        let (index, corpus) = setup(dir.path());

        let reqs = RequirementSet::from_descriptors(vec![RequiredImageDescriptor::new("Foo", 0, 10, 0)]);
        let precedence = BundlePrecedence::default();
        let resolved = ResolutionEngine::new(&index, &corpus, &precedence)
            .resolve(&reqs, &noop)
            .unwrap();

        assert_eq!(resolved.bundles_decoded, 1);
        assert_eq!(resolved.get(10).unwrap().name, "foo");
        assert_eq!(resolved.group().len(), 2);
        assert!(resolved.diagnostics.is_empty());
    }

    #[test]
    fn test_gap_and_alpha_exception() {
        let dir = tempfile::tempdir().unwrap();
        let mut merged = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        merged.get_pixel_mut(0, 0).0[3] = 0;
        let mut writer = BundleWriter::new();
        writer
            .add_image(ImageKind::Texture2D, 10, "foo", "", &RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255])))
            .add_image(ImageKind::Texture2D, 20, "premerged", "", &merged);
        writer.write_file(dir.path().join("b1.ab")).unwrap();
        let (index, corpus) = setup(dir.path());

        let reqs = RequirementSet::from_descriptors(vec![
            // opaque color: its missing alpha 11 is a gap
            RequiredImageDescriptor::new("Foo", 0, 10, 11),
            // color already carries alpha: missing 21 is not a gap
            RequiredImageDescriptor::new("Pre", 0, 20, 21),
            RequiredImageDescriptor::new("Bar", 0, 999, 0),
            RequiredImageDescriptor::new("Baz", 0, 0, 0),
        ]);
        let precedence = BundlePrecedence::default();
        let resolved = ResolutionEngine::new(&index, &corpus, &precedence)
            .resolve(&reqs, &noop)
            .unwrap();

        let gaps: Vec<&str> = resolved
            .diagnostics
            .of_kind(DiagnosticKind::ResolutionGap)
            .map(|d| d.subject.as_str())
            .collect();
        assert_eq!(gaps, vec!["11", "999"]);
        assert_eq!(resolved.diagnostics.of_kind(DiagnosticKind::InvalidPathId).count(), 1);
    }

    #[test]
    fn test_sprite_and_texture_may_share_path_id() {
        let dir = tempfile::tempdir().unwrap();
        let texture = RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255]));
        let sprite = RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 255]));
        let mut writer = BundleWriter::new();
        writer
            .add_image(ImageKind::Texture2D, 10, "foo", "", &texture)
            .add_image(ImageKind::Sprite, 10, "foo", "", &sprite);
        writer.write_file(dir.path().join("b1.ab")).unwrap();
        // Kinds split across two equally ranked bundles
        let mut other = BundleWriter::new();
        other.add_image(ImageKind::Sprite, 30, "bar", "", &sprite);
        other.write_file(dir.path().join("b2.ab")).unwrap();
        let mut third = BundleWriter::new();
        third.add_image(ImageKind::Texture2D, 30, "bar", "", &texture);
        third.write_file(dir.path().join("b3.ab")).unwrap();
        let (index, corpus) = setup(dir.path());

        let reqs = RequirementSet::from_descriptors(vec![
            RequiredImageDescriptor::new("Foo", 0, 10, 0),
            RequiredImageDescriptor::new("Bar", 0, 30, 0),
        ]);
        let precedence = BundlePrecedence::default();
        let resolved = ResolutionEngine::new(&index, &corpus, &precedence)
            .resolve(&reqs, &noop)
            .unwrap();

        let image = resolved.get(10).unwrap();
        assert_eq!(image.kind, ImageKind::Sprite);
        assert_eq!(image.width(), 2);
        assert_eq!(resolved.get(30).unwrap().kind, ImageKind::Sprite);
        assert!(resolved.diagnostics.is_empty());
    }

    #[test]
    fn test_precedence_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "avgpicprefab_a", &[(10, "from_avg")]);
        write(dir.path(), "character_a", &[(10, "from_character")]);
        let (index, corpus) = setup(dir.path());

        let reqs = RequirementSet::from_descriptors(vec![RequiredImageDescriptor::new("A", 0, 10, 0)]);
        let precedence = BundlePrecedence::default();
        let resolved = ResolutionEngine::new(&index, &corpus, &precedence)
            .resolve(&reqs, &noop)
            .unwrap();
        assert_eq!(resolved.get(10).unwrap().name, "from_character");

        let flat = BundlePrecedence {
            preferred: Vec::new(),
            deferred: Vec::new(),
        };
        let err = ResolutionEngine::new(&index, &corpus, &flat)
            .resolve(&reqs, &noop)
            .unwrap_err();
        assert!(matches!(err, Error::AmbiguousPathId { path_id: 10, .. }));
    }

    #[test]
    fn test_color_recovered_from_alpha_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b1", &[(11, "pic_Foo_Alpha")]);
        write(dir.path(), "b2", &[(50, "pic_Foo")]);
        let (index, corpus) = setup(dir.path());

        let reqs = RequirementSet::from_descriptors(vec![RequiredImageDescriptor::new("Foo", 0, 10, 11)]);
        let precedence = BundlePrecedence::default();
        let resolved = ResolutionEngine::new(&index, &corpus, &precedence)
            .resolve(&reqs, &noop)
            .unwrap();

        let color = resolved.get(10).unwrap();
        assert_eq!(color.name, "pic_Foo");
        assert_eq!(color.path_id, 50);
        assert!(resolved.diagnostics.is_empty());
    }
}
