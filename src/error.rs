use std::path::PathBuf;

use thiserror::Error;

/// Error type for posdb.
#[derive(Error, Debug)]
pub enum PosDbError {
    /// IO error.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization error.
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    /// OS-level open error, or the process-wide open-file cap was reached
    /// for direct (non-pooled) files.
    #[error("failed to open {path:?} in mode {mode}: {source}")]
    OpenFailed {
        /// Path that failed to open.
        path: PathBuf,
        /// Requested open mode, for diagnostics (e.g. "read", "append").
        mode: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Fewer elements were read than requested.
    #[error("short read at {path:?} offset {offset}: requested {requested}, got {actual}")]
    ReadShort {
        /// File the read was issued against.
        path: PathBuf,
        /// Byte offset of the read.
        offset: u64,
        /// Requested element/byte count.
        requested: usize,
        /// Elements/bytes actually read.
        actual: usize,
    },
    /// Fewer elements were written than requested.
    #[error("short write at {path:?}: requested {requested}, wrote {actual}")]
    WriteShort {
        /// File the write was issued against.
        path: PathBuf,
        /// Requested element/byte count.
        requested: usize,
        /// Elements/bytes actually written.
        actual: usize,
    },
    /// The manifest file is malformed (e.g. truncated, impossible key length).
    #[error("invalid manifest at {0:?}")]
    InvalidManifest(PathBuf),
    /// The manifest's format key does not match the format this code expects.
    #[error("manifest key mismatch at {path:?}: expected {expected:?}, found {found:?}")]
    ManifestKeyMismatch {
        /// Manifest path.
        path: PathBuf,
        /// Format key this build expects.
        expected: String,
        /// Format key actually stored in the manifest.
        found: String,
    },
    /// The manifest's endianness signature does not match native layout.
    #[error("manifest endianness mismatch at {0:?}")]
    ManifestEndiannessMismatch(PathBuf),
    /// A run's size is not a multiple of `sizeof(Entry)`.
    #[error("corrupt run {0:?}: size is not a multiple of the entry width")]
    CorruptRun(PathBuf),
    /// A query request violated one of the validity rules in the request schema.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A PGN game could not yield a usable result; tracked in ingest
    /// statistics rather than treated as a fatal ingest error.
    #[error("game skipped: {0}")]
    ParseSkipped(String),
    /// Error with a free-form message, for conditions not worth a dedicated variant.
    #[error("{0}")]
    StringError(String),
}

/// Custom result type for [`PosDbError`].
pub type Result<T> = std::result::Result<T, PosDbError>;
