//! # gfunpack
//!
//! Incremental image extraction from an asset-bundle corpus.
//!
//! Color textures and their `_alpha` masks are stored as separate objects
//! spread over thousands of bundles. `gfunpack` keeps a SQLite index of
//! every image object, opens only the bundles a run needs, pairs each color
//! image with its mask and composites them with an external image toolchain.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use gfunpack::prelude::*;
//!
//! let requirements = RequirementSet::load_json("characters.json")?;
//! let toolchain = Arc::new(MagickToolchain::locate(false)?);
//! let extractor = CharacterExtractor::new("bundles/", "images/", ExtractConfig::default(), toolchain);
//!
//! let report = extractor.run(&requirements, &|_| {})?;
//! report.write_images_json("images/images.json")?;
//! println!("{} images, {} diagnostics", report.images.len(), report.diagnostics.len());
//! # Ok::<(), gfunpack::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` - Enables the `gfunpack` command-line binary

pub mod alpha;
pub mod bundle;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extractor;
pub mod index;
pub mod merge;
pub mod progress;
pub mod reconcile;
pub mod resolve;

// Re-exports for convenience
pub use error::{Error, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{Error, Result};

    pub use crate::bundle::{BundleCorpus, BundleReader, BundleWriter, DecodedImage, ImageKind};
    pub use crate::config::{BundlePrecedence, ExtractConfig};
    pub use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
    pub use crate::extractor::{CharacterExtractor, ExtractionReport};
    pub use crate::index::{AssetIndex, ImageRecord, SyncStats};
    pub use crate::progress::{ExtractPhase, ExtractProgress, ProgressCallback};
    pub use crate::resolve::{RequiredImageDescriptor, RequirementSet, ResolutionEngine};

    pub use crate::alpha::{AlphaCatalog, AlphaMatcher, ImageGroup, OverrideTable};
    pub use crate::merge::{ImageToolchain, MagickToolchain, MergeTask, MergeWorkerPool};
    pub use crate::reconcile::{ReconcileReport, Reconciler};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI module (feature-gated)
#[cfg(feature = "cli")]
pub mod cli;
