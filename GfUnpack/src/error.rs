//! Error types for `gfunpack`

use std::path::PathBuf;

use thiserror::Error;

/// The error type for `gfunpack` operations.
///
/// Soft conditions (a required id missing from the corpus, a color image
/// without any alpha partner) are not errors; they are reported as
/// [`Diagnostic`](crate::diagnostics::Diagnostic)s so the run can finish.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== Corpus Errors ====================
    /// The bundle directory does not exist or is not a directory.
    #[error("bundle directory not found: {path}")]
    CorpusNotFound {
        /// The directory that was scanned.
        path: PathBuf,
    },

    /// The file is not a bundle (missing GFAB magic).
    #[error("invalid bundle magic in {path}: expected GFAB, found {found:?}")]
    InvalidBundleMagic {
        /// The offending file.
        path: PathBuf,
        /// The four bytes found at the start of the file.
        found: [u8; 4],
    },

    /// The bundle format version is not supported.
    #[error("unsupported bundle version: {version} (supported: {min}-{max})")]
    UnsupportedBundleVersion {
        /// The version found in the file.
        version: u32,
        /// Oldest supported version.
        min: u32,
        /// Newest supported version.
        max: u32,
    },

    /// The bundle's object table or payload is inconsistent.
    #[error("corrupt bundle {bundle}: {message}")]
    BundleCorrupt {
        /// Bundle name.
        bundle: String,
        /// What is wrong.
        message: String,
    },

    /// The named bundle is not part of the corpus.
    #[error("bundle not found in corpus: {0}")]
    BundleNotFound(String),

    /// The bundle does not contain an object with the given path id.
    #[error("no object with path_id {path_id} in bundle {bundle}")]
    ObjectNotFound {
        /// Bundle name.
        bundle: String,
        /// The requested path id.
        path_id: i64,
    },

    /// LZ4 decompression of a pixel payload failed.
    #[error("LZ4 decompression failed: {message}")]
    Lz4DecompressionFailed {
        /// The error message.
        message: String,
    },

    // ==================== Index Errors ====================
    /// SQLite error from the asset index.
    #[error("index database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The index schema does not match what this version expects.
    ///
    /// Not recoverable in place: delete the database file and re-sync.
    #[error("asset index is corrupt ({message}); delete {path} to rebuild it")]
    IndexCorruption {
        /// The database file.
        path: PathBuf,
        /// Description of the mismatch.
        message: String,
    },

    /// A bundle was requested by name but is not in the index.
    #[error("bundle not indexed: {0}")]
    BundleNotIndexed(String),

    // ==================== Resolution Errors ====================
    /// The same path id was found in two bundles of equal precedence.
    #[error("path_id {path_id} is ambiguous: present in both {first} and {second}")]
    AmbiguousPathId {
        /// The colliding path id.
        path_id: i64,
        /// Bundle that provided the object first.
        first: String,
        /// Bundle that collided with it.
        second: String,
    },

    // ==================== Toolchain Errors ====================
    /// A required external tool could not be started.
    #[error("required tool `{tool}` not found: {hint}")]
    ToolchainMissing {
        /// Executable name.
        tool: String,
        /// Installation hint.
        hint: String,
    },

    /// An external tool exited unsuccessfully.
    #[error("`{tool}` failed ({status}): {stderr}")]
    ExternalToolFailure {
        /// Executable name.
        tool: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// A merge task panicked.
    #[error("merge task panicked: {0}")]
    TaskPanicked(String),

    // ==================== Parsing Errors ====================
    /// TOML configuration or override table could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// An alpha override entry is malformed.
    #[error("invalid alpha override for {image}: {message}")]
    InvalidOverride {
        /// The image the entry applies to.
        image: String,
        /// What is wrong with it.
        message: String,
    },

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to encode or decode an image file.
    #[error("image error for {path}: {message}")]
    ImageEncode {
        /// The image file.
        path: PathBuf,
        /// The error message.
        message: String,
    },

    // ==================== File System Errors ====================
    /// Directory traversal error.
    #[error("directory walk error: {0}")]
    WalkDirError(String),
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::WalkDirError(err.to_string())
    }
}

/// A specialized Result type for `gfunpack` operations.
pub type Result<T> = std::result::Result<T, Error>;
