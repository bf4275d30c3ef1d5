//! Second pass over images written without an alpha mask.
//!
//! An opaque output often has a sibling (another costume index, a `(2)`
//! variant) whose mask was found. The reconciler looks for such a sibling in
//! the output tree and reuses its alpha channel.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::alpha::strip_numeric_suffix;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::error::Result;
use crate::merge::ImageToolchain;

/// A target that got its alpha from a sibling output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledImage {
    /// Output that was fixed, relative to the output root
    pub output: String,
    /// Output whose alpha was used
    pub mask: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub resolved: Vec<ReconciledImage>,
    /// Outputs still without alpha
    pub unresolved: Vec<String>,
}

/// Strip trailing `(...)` groups and `_<digits>` suffixes until neither is left
fn base_stem(stem: &str) -> &str {
    let mut current = stem.trim_end();
    loop {
        if current.ends_with(')')
            && let Some(open) = current.rfind('(')
        {
            current = current[..open].trim_end();
            continue;
        }
        if let Some(base) = strip_numeric_suffix(current) {
            current = base;
            continue;
        }
        return current;
    }
}

/// Comparison key and damaged flag of an output stem
fn stem_key(stem: &str) -> (String, bool) {
    let lower = base_stem(stem).to_lowercase();
    let mut damaged = false;
    let tokens: Vec<&str> = lower
        .split('_')
        .filter(|t| {
            let is_marker = *t == "d";
            damaged |= is_marker;
            !is_marker
        })
        .collect();
    (tokens.join("_"), damaged)
}

struct OutputFile {
    relative: String,
    path: PathBuf,
    key: (String, bool),
}

fn relative_string(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn scan_outputs(root: &Path) -> Result<Vec<OutputFile>> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || !path.extension().is_some_and(|e| e.eq_ignore_ascii_case("png"))
        {
            continue;
        }
        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        files.push(OutputFile {
            relative: relative_string(root, path),
            path: path.to_path_buf(),
            key: stem_key(&stem),
        });
    }
    Ok(files)
}

fn parent_of(relative: &str) -> &str {
    relative.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Finds alpha donors for opaque outputs and lists stray files
pub struct Reconciler<'a> {
    output_root: &'a Path,
    toolchain: &'a dyn ImageToolchain,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(output_root: &'a Path, toolchain: &'a dyn ImageToolchain) -> Self {
        Self {
            output_root,
            toolchain,
        }
    }

    /// Try to fix every output named by an `AlphaNotFound` diagnostic.
    ///
    /// Failures to probe or merge a candidate are logged and leave the
    /// target unresolved.
    ///
    /// # Errors
    /// Returns an error only if the output tree cannot be walked.
    pub fn reconcile(&self, missing: &[Diagnostic]) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let targets: Vec<&str> = missing
            .iter()
            .filter(|d| d.kind == DiagnosticKind::AlphaNotFound)
            .map(|d| d.subject.as_str())
            .collect();
        if targets.is_empty() {
            return Ok(report);
        }

        let outputs = scan_outputs(self.output_root)?;
        let mut opaque_cache: HashMap<PathBuf, bool> = HashMap::new();

        for target in targets {
            let Some(target_file) = outputs.iter().find(|o| o.relative == target) else {
                tracing::warn!("{target}: output missing, cannot reconcile");
                report.unresolved.push(target.to_string());
                continue;
            };
            let dir = parent_of(target);

            let mut candidates: Vec<&OutputFile> = outputs
                .iter()
                .filter(|o| o.relative != target_file.relative && o.key == target_file.key)
                .collect();
            candidates.sort_by(|a, b| {
                (parent_of(&a.relative) != dir, &a.relative).cmp(&(parent_of(&b.relative) != dir, &b.relative))
            });

            let donor = candidates.into_iter().find(|c| {
                let opaque = *opaque_cache.entry(c.path.clone()).or_insert_with(|| {
                    self.toolchain.probe_opacity(&c.path).unwrap_or_else(|e| {
                        tracing::warn!("{}: opacity probe failed: {e}", c.relative);
                        true
                    })
                });
                !opaque
            });

            match donor {
                Some(donor) => match self.merge_in_place(&target_file.path, &donor.path) {
                    Ok(()) => {
                        tracing::info!("{target}: alpha taken from {}", donor.relative);
                        opaque_cache.insert(target_file.path.clone(), false);
                        report.resolved.push(ReconciledImage {
                            output: target.to_string(),
                            mask: donor.relative.clone(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!("{target}: merge with {} failed: {e}", donor.relative);
                        report.unresolved.push(target.to_string());
                    }
                },
                None => report.unresolved.push(target.to_string()),
            }
        }
        Ok(report)
    }

    fn merge_in_place(&self, target: &Path, donor: &Path) -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let dims = |p: &Path| {
            image::image_dimensions(p).map_err(|e| crate::Error::ImageEncode {
                path: p.to_path_buf(),
                message: e.to_string(),
            })
        };
        let (width, height) = dims(target)?;

        let mask = if dims(donor)? == (width, height) {
            donor.to_path_buf()
        } else {
            let resized = scratch.path().join("mask.png");
            self.toolchain.resize_to_match(donor, width, height, &resized)?;
            resized
        };

        let merged = scratch.path().join("merged.png");
        self.toolchain.copy_alpha(target, &mask, &merged)?;
        std::fs::copy(&merged, target)?;
        Ok(())
    }

    /// PNG outputs that no result key points to
    ///
    /// # Errors
    /// Returns an error if the output tree cannot be walked.
    pub fn unreferenced(&self, referenced: &BTreeSet<String>) -> Result<Diagnostics> {
        let mut diagnostics = Diagnostics::new();
        for file in scan_outputs(self.output_root)? {
            if !referenced.contains(&file.relative) {
                diagnostics.report(
                    DiagnosticKind::UnreferencedOutput,
                    file.relative,
                    "no result key points to this file",
                );
            }
        }
        Ok(diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_base_stem() {
        assert_eq!(base_stem("pic_M4A1_2"), "pic_M4A1");
        assert_eq!(base_stem("pic_M4A1(2)"), "pic_M4A1");
        assert_eq!(base_stem("pic_M4A1_D (1)_3"), "pic_M4A1_D");
        assert_eq!(base_stem("pic_M4A1_D"), "pic_M4A1_D");
    }

    #[test]
    fn test_stem_key_tracks_damage() {
        assert_eq!(stem_key("pic_M4A1_D_1"), ("pic_m4a1".to_string(), true));
        assert_eq!(stem_key("Pic_M4A1(2)"), ("pic_m4a1".to_string(), false));
        assert_ne!(stem_key("pic_M4A1_D"), stem_key("pic_M4A1"));
    }
}
