//! The version-bearing source file on disk

use semver::Version;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{current_version, rewrite_version_markers, VersionError};

/// Main plugin file carrying the version markers
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
    constant_name: String,
}

impl SourceFile {
    /// Wrap the file at `path`; `constant_name` names the version constant
    pub fn new(path: impl Into<PathBuf>, constant_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            constant_name: constant_name.into(),
        }
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole file
    pub fn read(&self) -> Result<String, VersionError> {
        fs::read_to_string(&self.path).map_err(|source| VersionError::SourceUnavailable {
            path: self.path.clone(),
            source,
        })
    }

    /// Current version declared by the header marker
    pub fn current_version(&self) -> Result<Version, VersionError> {
        current_version(&self.read()?)
    }

    /// Rewrite both markers to `new_version`.
    ///
    /// The new text is built in memory and written to a sibling temp file
    /// that replaces the original only after both substitutions succeeded.
    /// Returns `false` when the file already carried `new_version`.
    pub fn rewrite_version(&self, new_version: &Version) -> Result<bool, VersionError> {
        let original = self.read()?;
        let updated = rewrite_version_markers(&original, &self.constant_name, new_version)?;
        if updated == original {
            return Ok(false);
        }

        let persist_err = |source| VersionError::Persist {
            path: self.path.clone(),
            source,
        };

        let temp_path = self.temp_path();
        let result = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(updated.as_bytes())?;
            file.sync_all()?;
            if let Ok(metadata) = fs::metadata(&self.path) {
                fs::set_permissions(&temp_path, metadata.permissions())?;
            }
            fs::rename(&temp_path, &self.path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(persist_err(e));
        }

        tracing::info!(
            path = %self.path.display(),
            version = %new_version,
            "updated version header and constant"
        );
        Ok(true)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
