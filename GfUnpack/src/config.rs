//! Run configuration
//!
//! Every field has a default, so an empty TOML file is a valid config:
//!
//! ```toml
//! workers = 8
//! quantize = true
//! per_worker_timeout_secs = 60
//!
//! [precedence]
//! preferred = ["character"]
//! deferred = ["avgpicprefab"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Database file name used when no `index_path` is configured
pub const DEFAULT_INDEX_FILE: &str = "image.db";

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_deferred() -> Vec<String> {
    vec!["avgpicprefab".to_string()]
}

/// Settings for one extraction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Merge worker count
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Re-merge outputs that already exist
    #[serde(default)]
    pub force: bool,
    /// Run `pngquant` over every merged output
    #[serde(default)]
    pub quantize: bool,
    /// Drain timeout per worker, in seconds
    #[serde(default = "default_timeout_secs")]
    pub per_worker_timeout_secs: u64,
    /// Also key results by `{owner}/{local name}`
    #[serde(default)]
    pub name_keys: bool,
    /// Index database location; defaults to `image.db` beside the output dir
    #[serde(default)]
    pub index_path: Option<PathBuf>,
    #[serde(default)]
    pub precedence: BundlePrecedence,
    /// External override table replacing the bundled one
    #[serde(default)]
    pub overrides: Option<PathBuf>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            force: false,
            quantize: false,
            per_worker_timeout_secs: default_timeout_secs(),
            name_keys: false,
            index_path: None,
            precedence: BundlePrecedence::default(),
            overrides: None,
        }
    }
}

impl ExtractConfig {
    /// Load a config from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parse a config from TOML text
    ///
    /// # Errors
    /// Returns [`Error::ConfigParse`](crate::Error::ConfigParse) on invalid TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.workers = config.workers.max(1);
        Ok(config)
    }

    /// Total time the merge pool is given to drain
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.per_worker_timeout_secs.saturating_mul(self.workers.max(1) as u64))
    }

    /// Effective index location for a run writing into `output_dir`
    #[must_use]
    pub fn index_path_for(&self, output_dir: &Path) -> PathBuf {
        if let Some(path) = &self.index_path {
            return path.clone();
        }
        match output_dir.parent() {
            Some(parent) => parent.join(DEFAULT_INDEX_FILE),
            None => PathBuf::from(DEFAULT_INDEX_FILE),
        }
    }
}

/// Which bundle wins when two bundles contain the same path id.
///
/// Patterns are case-insensitive substrings of the bundle name. Preferred
/// bundles outrank generic ones, which outrank deferred ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePrecedence {
    #[serde(default)]
    pub preferred: Vec<String>,
    #[serde(default = "default_deferred")]
    pub deferred: Vec<String>,
}

impl Default for BundlePrecedence {
    fn default() -> Self {
        Self {
            preferred: Vec::new(),
            deferred: default_deferred(),
        }
    }
}

impl BundlePrecedence {
    /// Rank of a bundle; higher wins
    #[must_use]
    pub fn rank(&self, bundle: &str) -> u8 {
        let lower = bundle.to_lowercase();
        let matches = |patterns: &[String]| patterns.iter().any(|p| lower.contains(&p.to_lowercase()));
        if matches(&self.preferred) {
            2
        } else if matches(&self.deferred) {
            0
        } else {
            1
        }
    }
}
