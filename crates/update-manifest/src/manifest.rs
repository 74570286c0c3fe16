//! The manifest document and its merge rules.
//!
//! Invariants held by every mutation:
//! - exactly one entry per version
//! - entries sorted by semver precedence, newest first
//! - `stable_version`, when set, names an entry in `versions`

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::entry::VersionEntry;
use crate::error::ManifestError;

/// The `update.json` document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Component (plugin slug) this manifest describes
    pub plugin: String,

    /// Published versions, newest first
    #[serde(default)]
    pub versions: Vec<VersionEntry>,

    /// Recommended version for update clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_version: Option<Version>,

    /// Top-level keys written by other tooling, kept as found
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Create an empty manifest for a component
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            versions: Vec::new(),
            stable_version: None,
            extra: Map::new(),
        }
    }

    /// Insert or replace the entry for `entry.version`, keeping the order.
    ///
    /// Publishing the same version twice leaves a single entry holding the
    /// most recent data.
    pub fn upsert_version(&mut self, entry: VersionEntry) {
        self.versions.retain(|existing| existing.version != entry.version);
        self.versions.push(entry);
        self.sort_versions();
    }

    /// Point `stable_version` at an already published version
    pub fn mark_stable(&mut self, version: &Version) -> Result<(), ManifestError> {
        if self.entry(version).is_none() {
            return Err(ManifestError::UnknownVersion(version.clone()));
        }
        self.stable_version = Some(version.clone());
        Ok(())
    }

    /// Sort entries by semver precedence, newest first
    pub fn sort_versions(&mut self) {
        self.versions.sort_by(|a, b| b.version.cmp(&a.version));
    }

    /// Find the entry for a version
    pub fn entry(&self, version: &Version) -> Option<&VersionEntry> {
        self.versions.iter().find(|e| &e.version == version)
    }

    /// Newest published entry
    pub fn latest(&self) -> Option<&VersionEntry> {
        self.versions.first()
    }

    /// Entry the stable pointer resolves to
    pub fn stable_entry(&self) -> Option<&VersionEntry> {
        self.stable_version.as_ref().and_then(|v| self.entry(v))
    }

    /// Check the uniqueness and stable-pointer invariants.
    ///
    /// Ordering is not checked here; callers re-sort after loading.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for entry in &self.versions {
            if !seen.insert(&entry.version) {
                return Err(format!("duplicate entry for version {}", entry.version));
            }
        }

        if let Some(stable) = &self.stable_version {
            if !seen.contains(stable) {
                return Err(format!("stable_version {} has no entry", stable));
            }
        }

        Ok(())
    }

    /// Serialize to pretty JSON (2-space indent)
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
