//! End-to-end extraction runs
//!
//! sync -> resolve -> match -> merge -> deferred overrides -> reconcile

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::alpha::{AlphaCatalog, AlphaMatcher, AlphaSource, MatchQuery, OverrideTable};
use crate::bundle::{BundleCorpus, DecodedImage, ImageKind};
use crate::config::ExtractConfig;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::Result;
use crate::index::{AssetIndex, ImageRecord, SyncStats};
use crate::merge::{DrainReport, ImageToolchain, MaskInput, MergeOptions, MergeTask, MergeWorkerPool, TaskStatus};
use crate::progress::{ExtractPhase, ExtractProgress, ProgressCallback};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::resolve::{RequirementSet, ResolutionEngine, ResolvedImages};

/// File name of the result map written next to the outputs
pub const RESULT_FILE: &str = "images.json";

/// Outcome of one [`CharacterExtractor::run`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    /// Result key -> output path relative to the output root
    pub images: BTreeMap<String, String>,
    pub sync: SyncStats,
    pub bundles_decoded: usize,
    pub written: usize,
    pub cached: usize,
    pub failed: usize,
    pub peak_concurrency: usize,
    pub reconcile: ReconcileReport,
    pub diagnostics: Diagnostics,
}

impl ExtractionReport {
    /// Outputs that still have no alpha after reconciliation
    #[must_use]
    pub fn unresolved_alpha(&self) -> &[String] {
        &self.reconcile.unresolved
    }

    /// Write the result map as pretty JSON
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_images_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.images)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

/// A merge whose mask is another output, run after the main pass
struct DeferredMerge {
    output: String,
    task: MergeTask,
    target: String,
}

/// Output planned for the main pass
struct Plan {
    task: MergeTask,
    /// Opaque color written without a mask
    needs_alpha: bool,
    deferred_target: Option<String>,
}

/// Extracts required images from a bundle corpus into an output tree
pub struct CharacterExtractor {
    bundle_dir: PathBuf,
    output_dir: PathBuf,
    config: ExtractConfig,
    toolchain: Arc<dyn ImageToolchain>,
}

impl CharacterExtractor {
    #[must_use]
    pub fn new(
        bundle_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        config: ExtractConfig,
        toolchain: Arc<dyn ImageToolchain>,
    ) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            output_dir: output_dir.into(),
            config,
            toolchain,
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Open the index for this extractor's corpus and bring it up to date
    ///
    /// # Errors
    /// Returns an error if the corpus cannot be scanned or the sync fails.
    pub fn sync_index(&self) -> Result<(AssetIndex, BundleCorpus, SyncStats)> {
        let corpus = BundleCorpus::scan(&self.bundle_dir)?;
        let mut index = AssetIndex::open(self.config.index_path_for(&self.output_dir), &self.bundle_dir)?;
        let stats = index.sync(&corpus)?;
        Ok((index, corpus, stats))
    }

    /// Run a full extraction.
    ///
    /// Soft failures end up in the report's diagnostics; only index,
    /// corpus and ambiguity errors abort the run.
    ///
    /// # Errors
    /// Returns an error if the index cannot be synced, a bundle cannot be
    /// decoded during resolution, or a path id is ambiguous.
    pub fn run(&self, requirements: &RequirementSet, progress: ProgressCallback) -> Result<ExtractionReport> {
        progress(&ExtractProgress::new(ExtractPhase::SyncingIndex, 0, 1));
        let (index, corpus, sync) = self.sync_index()?;

        let mut resolved = ResolutionEngine::new(&index, &corpus, &self.config.precedence).resolve(requirements, progress)?;

        let overrides = match &self.config.overrides {
            Some(path) => OverrideTable::load(path)?,
            None => OverrideTable::bundled()?,
        };
        let catalog = AlphaCatalog::from_records(index.alpha_textures()?);
        tracing::info!("{} masks decoded, {} in catalog", resolved.group().len(), catalog.len());
        let matcher = AlphaMatcher::new(resolved.take_group(), catalog, overrides);

        let mut report = ExtractionReport {
            sync,
            bundles_decoded: resolved.bundles_decoded,
            diagnostics: std::mem::take(&mut resolved.diagnostics),
            ..ExtractionReport::default()
        };

        let plans = self.plan(requirements, &resolved, &matcher, &index, &corpus, &mut report.diagnostics, progress);
        tracing::info!("Planned {} outputs for {} descriptors", plans.len(), requirements.len());

        // Main pass
        let mut pool = MergeWorkerPool::new(
            self.config.workers,
            Arc::clone(&self.toolchain),
            MergeOptions {
                output_root: self.output_dir.clone(),
                force: self.config.force,
                quantize: self.config.quantize,
            },
        )?;
        let mut needs_alpha = BTreeSet::new();
        let mut deferred = Vec::new();
        for plan in plans.into_values() {
            let output = plan.task.relative_path();
            if plan.needs_alpha {
                needs_alpha.insert(output.clone());
            }
            if let Some(target) = plan.deferred_target {
                let mut task = plan.task.clone();
                task.alpha = Some(MaskInput::File(self.output_dir.join(&target)));
                deferred.push(DeferredMerge {
                    output: output.clone(),
                    task,
                    target,
                });
            }
            pool.submit(plan.task)?;
        }
        let drained = pool.drain(self.config.drain_timeout(), progress);
        let written: BTreeSet<String> = drained
            .outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Written)
            .map(|o| o.output.clone())
            .collect();
        self.collect(&drained, &mut report);

        // Missing alpha: fresh opaque writes, and cached outputs an earlier run could not fix
        for output in &needs_alpha {
            let still_opaque = written.contains(output)
                || (report.images.values().any(|v| v == output) && output_is_opaque(&self.output_dir.join(output)));
            if still_opaque {
                report
                    .diagnostics
                    .report(DiagnosticKind::AlphaNotFound, output.clone(), "no alpha mask candidate");
            }
        }

        // Overrides that point at other outputs; cached outputs had theirs applied already
        let deferred: Vec<DeferredMerge> = deferred.into_iter().filter(|d| written.contains(&d.output)).collect();
        if !deferred.is_empty() {
            self.apply_deferred(deferred, &mut report, progress)?;
        }

        progress(&ExtractProgress::new(ExtractPhase::Reconciling, 0, 1));
        let reconciler = Reconciler::new(&self.output_dir, self.toolchain.as_ref());
        let missing: Vec<_> = report
            .diagnostics
            .of_kind(DiagnosticKind::AlphaNotFound)
            .cloned()
            .collect();
        report.reconcile = reconciler.reconcile(&missing)?;
        let fixed: BTreeSet<&String> = report.reconcile.resolved.iter().map(|r| &r.output).collect();
        report
            .diagnostics
            .take_where(|d| d.kind == DiagnosticKind::AlphaNotFound && fixed.contains(&d.subject));

        let referenced: BTreeSet<String> = report.images.values().cloned().collect();
        report.diagnostics.extend(reconciler.unreferenced(&referenced)?);

        progress(&ExtractProgress::new(ExtractPhase::Complete, 1, 1));
        tracing::info!(
            "Extraction done: {} written, {} cached, {} failed, {} diagnostics",
            report.written,
            report.cached,
            report.failed,
            report.diagnostics.len()
        );
        Ok(report)
    }

    /// Pair every resolved color image with its mask, one plan per output path
    fn plan(
        &self,
        requirements: &RequirementSet,
        resolved: &ResolvedImages,
        matcher: &AlphaMatcher,
        index: &AssetIndex,
        corpus: &BundleCorpus,
        diagnostics: &mut Diagnostics,
        progress: ProgressCallback,
    ) -> BTreeMap<String, Plan> {
        let mut plans: BTreeMap<String, Plan> = BTreeMap::new();
        let mut masks: HashMap<(String, i64), Arc<DecodedImage>> = HashMap::new();
        let total = requirements.len();

        for (i, d) in requirements.descriptors().iter().enumerate() {
            progress(&ExtractProgress::with_item(ExtractPhase::MatchingAlpha, i + 1, total, d.key()));
            let Some(color) = resolved.get(d.color_path_id) else {
                continue;
            };
            let output_dir = d.output_dir();
            let output = format!("{output_dir}/{}.png", color.name);

            let mut keys = vec![d.key()];
            if self.config.name_keys {
                keys.push(format!("{}/{}", d.owner_name, color.name));
            }
            if let Some(existing) = plans.get_mut(&output) {
                for key in keys {
                    if !existing.task.keys.contains(&key) {
                        existing.task.keys.push(key);
                    }
                }
                continue;
            }

            let query = MatchQuery {
                color,
                output_path: &output,
                explicit_alpha: if d.has_alpha() { resolved.get(d.alpha_path_id) } else { None },
            };

            let mut alpha = None;
            let mut needs_alpha = false;
            let mut deferred_target = None;
            match matcher.find_alpha(&query) {
                Some(found) => {
                    tracing::debug!("{output}: mask via {}", found.rule.as_str());
                    match found.source {
                        AlphaSource::Decoded(mask) => alpha = Some(MaskInput::Image(mask)),
                        AlphaSource::Indexed(record) => match decode_cached(&mut masks, corpus, &record) {
                            Ok(mask) => alpha = Some(MaskInput::Image(mask)),
                            Err(e) => {
                                diagnostics.report(DiagnosticKind::TaskFailed, output.clone(), e.to_string());
                                continue;
                            }
                        },
                        AlphaSource::Named(name) => match named_mask(index, corpus, &mut masks, &name) {
                            Ok(Some(mask)) => alpha = Some(MaskInput::Image(mask)),
                            Ok(None) => {
                                tracing::warn!("{output}: override asset {name} is not indexed");
                                needs_alpha = !color.has_transparency();
                            }
                            Err(e) => {
                                diagnostics.report(
                                    DiagnosticKind::TaskFailed,
                                    output.clone(),
                                    format!("override asset {name}: {e}"),
                                );
                                continue;
                            }
                        },
                        AlphaSource::Output(target) => deferred_target = Some(target),
                    }
                }
                None => needs_alpha = !color.has_transparency(),
            }

            plans.insert(
                output,
                Plan {
                    task: MergeTask {
                        output_dir,
                        output_name: color.name.clone(),
                        color: Arc::clone(color),
                        alpha,
                        keys,
                    },
                    needs_alpha,
                    deferred_target,
                },
            );
        }
        plans
    }

    fn collect(&self, drained: &DrainReport, report: &mut ExtractionReport) {
        report.peak_concurrency = report.peak_concurrency.max(drained.peak_concurrency);
        for outcome in &drained.outcomes {
            match &outcome.status {
                TaskStatus::Written | TaskStatus::Cached => {
                    if outcome.status == TaskStatus::Written {
                        report.written += 1;
                    } else {
                        report.cached += 1;
                    }
                    for key in &outcome.keys {
                        report.images.insert(key.clone(), outcome.output.clone());
                    }
                }
                TaskStatus::Failed(reason) => {
                    report.failed += 1;
                    report
                        .diagnostics
                        .report(DiagnosticKind::TaskFailed, outcome.output.clone(), reason.clone());
                }
                TaskStatus::TimedOut => {
                    report.failed += 1;
                    report.diagnostics.report(
                        DiagnosticKind::TaskFailed,
                        outcome.output.clone(),
                        "timed out waiting for merge",
                    );
                }
            }
        }
    }

    fn apply_deferred(
        &self,
        deferred: Vec<DeferredMerge>,
        report: &mut ExtractionReport,
        progress: ProgressCallback,
    ) -> Result<()> {
        progress(&ExtractProgress::new(ExtractPhase::ApplyingOverrides, 0, deferred.len()));
        let mut pool = MergeWorkerPool::new(
            self.config.workers,
            Arc::clone(&self.toolchain),
            MergeOptions {
                output_root: self.output_dir.clone(),
                force: true,
                quantize: self.config.quantize,
            },
        )?;

        for d in deferred {
            if self.output_dir.join(&d.target).is_file() {
                pool.submit(d.task)?;
            } else if d.task.color.has_transparency() {
                tracing::debug!("{}: override target {} missing, keeping color alpha", d.output, d.target);
            } else {
                report.diagnostics.report(
                    DiagnosticKind::AlphaNotFound,
                    d.output,
                    format!("override target {} was not written", d.target),
                );
            }
        }

        let drained = pool.drain(self.config.drain_timeout(), progress);
        for outcome in &drained.outcomes {
            // The opaque version is already in the result map
            if !outcome.status.is_success() {
                report.failed += 1;
                report.diagnostics.report(
                    DiagnosticKind::TaskFailed,
                    outcome.output.clone(),
                    format!("override merge: {:?}", outcome.status),
                );
            }
        }
        report.peak_concurrency = report.peak_concurrency.max(drained.peak_concurrency);
        Ok(())
    }
}

fn find_named(index: &AssetIndex, name: &str) -> Result<Option<ImageRecord>> {
    match index.find_by_name(name, ImageKind::Texture2D)? {
        Some(record) => Ok(Some(record)),
        None => index.find_by_name(name, ImageKind::Sprite),
    }
}

/// Mask for an override that names an indexed asset; `None` if it is not indexed
fn named_mask(
    index: &AssetIndex,
    corpus: &BundleCorpus,
    cache: &mut HashMap<(String, i64), Arc<DecodedImage>>,
    name: &str,
) -> Result<Option<Arc<DecodedImage>>> {
    match find_named(index, name)? {
        Some(record) => decode_cached(cache, corpus, &record).map(Some),
        None => Ok(None),
    }
}

fn decode_cached(
    cache: &mut HashMap<(String, i64), Arc<DecodedImage>>,
    corpus: &BundleCorpus,
    record: &ImageRecord,
) -> Result<Arc<DecodedImage>> {
    let key = (record.bundle.clone(), record.path_id);
    if let Some(image) = cache.get(&key) {
        return Ok(Arc::clone(image));
    }
    let image = Arc::new(corpus.decode_image(&record.bundle, record.path_id, record.kind)?);
    cache.insert(key, Arc::clone(&image));
    Ok(image)
}

/// In-process check of a written output; unreadable files count as opaque
fn output_is_opaque(path: &Path) -> bool {
    image::open(path).map_or(true, |img| img.to_rgba8().pixels().all(|p| p.0[3] == u8::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleWriter;
    use crate::error::Error;
    use image::{Rgba, RgbaImage};

    fn indexed_corpus(dir: &Path) -> (AssetIndex, BundleCorpus) {
        let mut writer = BundleWriter::new();
        writer.add_image(
            ImageKind::Texture2D,
            7,
            "pic_Foo_alpha",
            "",
            &RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])),
        );
        writer.write_file(dir.join("b1.ab")).unwrap();
        let corpus = BundleCorpus::scan(dir).unwrap();
        let mut index = AssetIndex::open_in_memory(dir).unwrap();
        index.sync(&corpus).unwrap();
        (index, corpus)
    }

    #[test]
    fn test_named_mask_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let (index, corpus) = indexed_corpus(dir.path());
        let mut cache = HashMap::new();

        let found = named_mask(&index, &corpus, &mut cache, "pic_Foo_alpha").unwrap();
        assert_eq!(found.unwrap().path_id, 7);
        assert_eq!(cache.len(), 1);
        assert!(named_mask(&index, &corpus, &mut cache, "pic_Bar_alpha").unwrap().is_none());
    }

    #[test]
    fn test_named_mask_index_error_is_not_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let (index, corpus) = indexed_corpus(dir.path());
        index.connection().execute_batch("DROP TABLE image").unwrap();

        let result = named_mask(&index, &corpus, &mut HashMap::new(), "pic_Foo_alpha");
        assert!(matches!(result, Err(Error::Sqlite(_))));
    }
}
