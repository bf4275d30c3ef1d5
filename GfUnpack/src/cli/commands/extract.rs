//! CLI command for image extraction

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::cli::progress::{DISK, LOOKING_GLASS, PICTURE, PhaseBar, WARNING, print_done, print_step};
use crate::config::ExtractConfig;
use crate::extractor::{CharacterExtractor, RESULT_FILE};
use crate::merge::MagickToolchain;
use crate::resolve::RequirementSet;

/// Flags that override the config file
#[derive(Debug, Clone, Default)]
pub struct ExtractCliOptions {
    pub index: Option<PathBuf>,
    pub workers: Option<usize>,
    pub force: bool,
    pub quantize: bool,
    pub name_keys: bool,
    pub overrides: Option<PathBuf>,
}

impl ExtractCliOptions {
    fn apply(&self, config: &mut ExtractConfig) {
        if let Some(index) = &self.index {
            config.index_path = Some(index.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        if let Some(overrides) = &self.overrides {
            config.overrides = Some(overrides.clone());
        }
        config.force |= self.force;
        config.quantize |= self.quantize;
        config.name_keys |= self.name_keys;
    }
}

pub fn execute(
    bundles: &Path,
    output: &Path,
    descriptors: &Path,
    config_path: Option<&Path>,
    options: &ExtractCliOptions,
    progress: bool,
) -> anyhow::Result<()> {
    let started = Instant::now();

    let mut config = match config_path {
        Some(path) => ExtractConfig::load(path)?,
        None => ExtractConfig::default(),
    };
    options.apply(&mut config);

    print_step(1, 3, LOOKING_GLASS, "Checking toolchain...");
    let toolchain = Arc::new(MagickToolchain::locate(config.quantize)?);
    let requirements = RequirementSet::load_json(descriptors)?;
    println!(
        "{} descriptors, {} path ids, {} workers",
        requirements.len(),
        requirements.ids().len(),
        config.workers
    );

    print_step(2, 3, PICTURE, "Extracting images...");
    let extractor = CharacterExtractor::new(bundles, output, config, toolchain);
    let bar = if progress { PhaseBar::new() } else { PhaseBar::hidden() };
    let report = extractor.run(&requirements, &|p| bar.update(p))?;
    bar.finish();

    print_step(3, 3, DISK, "Writing result map...");
    std::fs::create_dir_all(output)?;
    let result_path = output.join(RESULT_FILE);
    report.write_images_json(&result_path)?;

    println!(
        "Index: {} added, {} removed, {} unchanged; {} bundles decoded",
        report.sync.added, report.sync.removed, report.sync.unchanged, report.bundles_decoded
    );
    println!(
        "Images: {} written, {} cached, {} failed, {} reconciled",
        report.written,
        report.cached,
        report.failed,
        report.reconcile.resolved.len()
    );
    println!("{} keys -> {}", report.images.len(), result_path.display());

    if !report.diagnostics.is_empty() {
        println!();
        for (kind, count) in report.diagnostics.summary() {
            println!("{WARNING}{count} {}", kind.as_str());
        }
        for diagnostic in &report.diagnostics {
            println!("  {diagnostic}");
        }
    }

    print_done(started.elapsed());
    Ok(())
}
