//! Declarative alpha override table

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

const BUNDLED_OVERRIDES: &str = include_str!("../../data/alpha_overrides.toml");

/// Where an override takes its mask from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideTarget {
    /// Object name of an indexed image
    Asset(String),
    /// Output path (relative to the output root) of an already written image
    Output(String),
}

#[derive(Debug, Deserialize)]
struct OverrideFile {
    #[serde(default, rename = "override")]
    entries: Vec<OverrideEntry>,
}

#[derive(Debug, Deserialize)]
struct OverrideEntry {
    image: String,
    #[serde(default)]
    asset: Option<String>,
    #[serde(default)]
    output: Option<String>,
}

/// Override table keyed by output path (`{owner dir}/{name}.png`)
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: BTreeMap<String, OverrideTarget>,
}

impl OverrideTable {
    /// The table shipped with the crate
    ///
    /// # Errors
    /// Only fails if the bundled data is malformed.
    pub fn bundled() -> Result<Self> {
        Self::from_toml_str(BUNDLED_OVERRIDES)
    }

    /// Load a table from a TOML file, replacing the bundled one
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parse a table from TOML text
    ///
    /// # Errors
    /// Returns [`Error::InvalidOverride`] if an entry names both or neither
    /// of `asset` and `output`.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: OverrideFile = toml::from_str(text)?;
        let mut entries = BTreeMap::new();
        for entry in file.entries {
            let target = match (entry.asset, entry.output) {
                (Some(asset), None) => OverrideTarget::Asset(asset),
                (None, Some(output)) => OverrideTarget::Output(normalize(&output)),
                (Some(_), Some(_)) => {
                    return Err(Error::InvalidOverride {
                        image: entry.image,
                        message: "both `asset` and `output` given".to_string(),
                    });
                }
                (None, None) => {
                    return Err(Error::InvalidOverride {
                        image: entry.image,
                        message: "needs `asset` or `output`".to_string(),
                    });
                }
            };
            entries.insert(normalize(&entry.image), target);
        }
        Ok(Self { entries })
    }

    /// Override for an output path, if any
    #[must_use]
    pub fn get(&self, image: &str) -> Option<&OverrideTarget> {
        self.entries.get(&normalize(image))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Output paths compare with `/` separators and a lowercased directory; the
// file name keeps its case since that is the object name.
fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    match path.rsplit_once('/') {
        Some((dir, file)) => format!("{}/{file}", dir.to_lowercase()),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bundled_table_parses() {
        let table = OverrideTable::bundled().unwrap();
        assert_eq!(table.len(), 5);
        assert_eq!(
            table.get("ar18/AR18_N_4.png"),
            Some(&OverrideTarget::Output("ar18/pic_AR18.png".to_string()))
        );
        assert_eq!(
            table.get("NPC-Sakura/Pic_Sakura_D.png"),
            Some(&OverrideTarget::Output("npc-sakura/Pic_Sakura_D_1.png".to_string()))
        );
    }

    #[test]
    fn test_asset_target() {
        let table = OverrideTable::from_toml_str(
            "[[override]]\nimage = \"foo/pic_foo.png\"\nasset = \"pic_foo_mask\"\n",
        )
        .unwrap();
        assert_eq!(
            table.get("foo/pic_foo.png"),
            Some(&OverrideTarget::Asset("pic_foo_mask".to_string()))
        );
    }

    #[test]
    fn test_entry_needs_exactly_one_target() {
        let err = OverrideTable::from_toml_str("[[override]]\nimage = \"a/b.png\"\n").unwrap_err();
        assert!(matches!(err, Error::InvalidOverride { .. }));

        let err = OverrideTable::from_toml_str(
            "[[override]]\nimage = \"a/b.png\"\nasset = \"x\"\noutput = \"a/c.png\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOverride { .. }));
    }
}
