use std::path::PathBuf;

use thiserror::Error;

/// Infrastructure failures surfaced by the engine and its configuration layer.
///
/// Business-data problems (bad dates, short histories) never produce one of
/// these; they degrade to empty or null metrics instead.
#[derive(Debug, Error)]
pub enum ReliabilityError {
    /// A configuration value is out of its accepted range.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Reading a configuration or input file failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// A configuration document could not be parsed.
    #[error("parse error in {path}: {message}")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// A per-vehicle computation task panicked or was cancelled.
    #[error("vehicle task failed for {vehicle_id}: {message}")]
    Task {
        /// Vehicle whose task failed.
        vehicle_id: String,
        /// Join error text.
        message: String,
    },
}

/// Convenience alias for engine results.
pub type ReliabilityResult<T> = Result<T, ReliabilityError>;
