//! Error types for manifest operations.

use semver::Version;
use std::io;
use std::path::PathBuf;

/// Errors raised while loading, mutating or persisting a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("manifest {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest {path} violates its invariants: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("manifest {path} belongs to '{found}', expected '{expected}'")]
    ComponentMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("version {0} is not present in the manifest")]
    UnknownVersion(Version),

    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
