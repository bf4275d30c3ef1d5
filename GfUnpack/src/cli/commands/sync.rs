//! CLI command for index synchronization

use std::path::Path;
use std::time::Instant;

use crate::bundle::BundleCorpus;
use crate::cli::progress::{LINK, PACKAGE, print_done, print_step, simple_spinner};
use crate::index::AssetIndex;

pub fn execute(bundles: &Path, index_path: &Path) -> anyhow::Result<()> {
    let started = Instant::now();

    print_step(1, 2, PACKAGE, &format!("Scanning {}...", bundles.display()));
    let corpus = BundleCorpus::scan(bundles)?;
    println!("Found {} bundles", corpus.len());

    print_step(2, 2, LINK, "Updating index...");
    let mut index = AssetIndex::open(index_path, bundles)?;
    let pb = simple_spinner("syncing");
    let stats = index.sync(&corpus)?;
    pb.finish_and_clear();

    println!(
        "{} added, {} removed, {} unchanged ({} records inserted, {} deleted)",
        stats.added, stats.removed, stats.unchanged, stats.records_inserted, stats.records_deleted
    );
    println!(
        "Index holds {} images from {} bundles",
        index.image_count()?,
        index.bundle_count()?
    );
    print_done(started.elapsed());
    Ok(())
}
