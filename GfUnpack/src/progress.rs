//! Progress reporting for extraction runs

/// Progress callback type for extraction runs
pub type ProgressCallback<'a> = &'a (dyn Fn(&ExtractProgress) + Sync + Send);

/// Progress information during an extraction run
#[derive(Debug, Clone)]
pub struct ExtractProgress {
    /// Current operation phase
    pub phase: ExtractPhase,
    /// Current item number (1-indexed)
    pub current: usize,
    /// Total number of items
    pub total: usize,
    /// Item being processed (bundle name or output path), if applicable
    pub current_item: Option<String>,
}

impl ExtractProgress {
    /// Create a new progress update
    #[must_use]
    pub fn new(phase: ExtractPhase, current: usize, total: usize) -> Self {
        Self {
            phase,
            current,
            total,
            current_item: None,
        }
    }

    /// Create a progress update with an item name
    #[must_use]
    pub fn with_item(
        phase: ExtractPhase,
        current: usize,
        total: usize,
        item: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            current,
            total,
            current_item: Some(item.into()),
        }
    }

    /// Get the progress percentage (0.0 - 1.0)
    #[must_use]
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.current as f32 / self.total as f32
        }
    }
}

/// Phase of an extraction run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractPhase {
    /// Comparing the corpus against the index
    SyncingIndex,
    /// Decoding the bundles that hold required objects
    DecodingBundles,
    /// Pairing color images with alpha masks
    MatchingAlpha,
    /// Compositing images in the worker pool
    Merging,
    /// Second-pass merges against already written outputs
    ApplyingOverrides,
    /// Searching the output tree for missing alpha masks
    Reconciling,
    /// Run complete
    Complete,
}

impl ExtractPhase {
    /// Get a human-readable description of this phase
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SyncingIndex => "Syncing index",
            Self::DecodingBundles => "Decoding bundles",
            Self::MatchingAlpha => "Matching alpha masks",
            Self::Merging => "Merging images",
            Self::ApplyingOverrides => "Applying overrides",
            Self::Reconciling => "Reconciling",
            Self::Complete => "Complete",
        }
    }
}
