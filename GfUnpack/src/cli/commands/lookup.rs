//! CLI command for index lookups

use std::path::Path;

use crate::bundle::ImageKind;
use crate::index::{AssetIndex, ImageRecord};

fn print_record(record: &ImageRecord) {
    println!(
        "{:>20}  {:<10} {:<40} {}x{}  {}",
        record.path_id, record.kind, record.name, record.width, record.height, record.bundle
    );
    if !record.container.is_empty() {
        println!("{:>20}  {}", "", record.container);
    }
}

pub fn execute(
    bundles: &Path,
    index_path: &Path,
    path_ids: &[i64],
    name: Option<&str>,
    sprite: bool,
) -> anyhow::Result<()> {
    if !index_path.is_file() {
        anyhow::bail!("no index at {}; run `gfunpack sync` first", index_path.display());
    }
    let index = AssetIndex::open(index_path, bundles)?;
    let kind = if sprite { ImageKind::Sprite } else { ImageKind::Texture2D };

    if let Some(name) = name {
        match index.find_by_name(name, kind)? {
            Some(record) => print_record(&record),
            None => println!("No {kind} named {name}"),
        }
        return Ok(());
    }

    if path_ids.is_empty() {
        anyhow::bail!("give --path-id or --name");
    }
    let records = index.lookup_by_path_ids(path_ids, kind)?;
    for record in &records {
        print_record(record);
    }
    let missing: Vec<String> = path_ids
        .iter()
        .filter(|id| !records.iter().any(|r| r.path_id == **id))
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        println!("Not indexed as {kind}: {}", missing.join(", "));
    }
    Ok(())
}
