//! Loading and atomically persisting the manifest file.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::ManifestError;
use crate::manifest::Manifest;

/// What to do when the persisted manifest cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
    /// Refuse to continue
    #[default]
    Fail,
    /// Log a warning and start over from an empty manifest
    Reset,
}

/// File-backed manifest store for one component
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
    component: String,
    on_corrupt: CorruptPolicy,
}

impl ManifestStore {
    /// Create a store for `component` persisted at `path`
    pub fn new(path: impl Into<PathBuf>, component: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            component: component.into(),
            on_corrupt: CorruptPolicy::default(),
        }
    }

    /// Set the corrupt-manifest policy
    pub fn with_corrupt_policy(mut self, policy: CorruptPolicy) -> Self {
        self.on_corrupt = policy;
        self
    }

    /// Path of the manifest file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest.
    ///
    /// A missing file yields an empty manifest for the component. A file that
    /// does not parse, or breaks the manifest invariants, is handled per
    /// [`CorruptPolicy`]. Entries are re-sorted on load.
    pub fn load(&self) -> Result<Manifest, ManifestError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no manifest yet, starting empty");
                return Ok(Manifest::new(&self.component));
            }
            Err(source) => {
                return Err(ManifestError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match self.parse(&json) {
            Ok(manifest) => Ok(manifest),
            Err(err @ (ManifestError::Parse { .. } | ManifestError::Invalid { .. }))
                if self.on_corrupt == CorruptPolicy::Reset =>
            {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "existing manifest is invalid, creating a new one"
                );
                Ok(Manifest::new(&self.component))
            }
            Err(err) => Err(err),
        }
    }

    fn parse(&self, json: &str) -> Result<Manifest, ManifestError> {
        let mut manifest = Manifest::from_json(json).map_err(|source| ManifestError::Parse {
            path: self.path.clone(),
            source,
        })?;

        if manifest.plugin != self.component {
            return Err(ManifestError::ComponentMismatch {
                path: self.path.clone(),
                expected: self.component.clone(),
                found: manifest.plugin,
            });
        }

        manifest
            .check_invariants()
            .map_err(|reason| ManifestError::Invalid {
                path: self.path.clone(),
                reason,
            })?;

        manifest.sort_versions();
        Ok(manifest)
    }

    /// Persist the manifest (write-then-rename).
    ///
    /// The temp file is flushed to disk before it replaces the manifest, so
    /// an interrupted save leaves the previous file intact.
    pub fn save(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        let write_err = |source: io::Error| ManifestError::Write {
            path: self.path.clone(),
            source,
        };

        let json = manifest
            .to_json()
            .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let temp_path = self.path.with_extension("json.tmp");
        let result = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(write_err(e));
        }

        tracing::debug!(
            path = %self.path.display(),
            versions = manifest.versions.len(),
            "manifest saved"
        );
        Ok(())
    }
}
