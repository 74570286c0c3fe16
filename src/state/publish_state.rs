//! Publish state (publish_state.json)

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::{now_utc, TerminalState};
use crate::version::VersionBump;

/// Schema version for publish_state.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "plugin-publish/publish_state@1";

/// File name of the persisted state, inside the output directory
pub const STATE_FILE_NAME: &str = "publish_state.json";

/// Publish stage enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishStage {
    /// Nothing done yet
    Pending,
    /// Source markers carry the new version
    VersionRewritten,
    /// Archive written to the output directory
    ArchiveBuilt,
    /// Manifest saved locally
    ManifestWritten,
    /// Archive stored remotely
    ArchiveUploaded,
    /// Manifest stored remotely; run done
    Completed,
    /// Run aborted, see `failed_stage`
    Failed,
}

impl TerminalState for PublishStage {
    fn is_terminal(&self) -> bool {
        matches!(self, PublishStage::Completed | PublishStage::Failed)
    }
}

impl PublishStage {
    /// Stage that follows this one on success
    pub fn next(&self) -> Option<PublishStage> {
        match self {
            PublishStage::Pending => Some(PublishStage::VersionRewritten),
            PublishStage::VersionRewritten => Some(PublishStage::ArchiveBuilt),
            PublishStage::ArchiveBuilt => Some(PublishStage::ManifestWritten),
            PublishStage::ManifestWritten => Some(PublishStage::ArchiveUploaded),
            PublishStage::ArchiveUploaded => Some(PublishStage::Completed),
            PublishStage::Completed | PublishStage::Failed => None,
        }
    }

    /// Check if transition from this stage to target is valid
    pub fn can_transition_to(&self, target: PublishStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == PublishStage::Failed || self.next() == Some(target)
    }
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishStage::Pending => "pending",
            PublishStage::VersionRewritten => "version_rewritten",
            PublishStage::ArchiveBuilt => "archive_built",
            PublishStage::ManifestWritten => "manifest_written",
            PublishStage::ArchiveUploaded => "archive_uploaded",
            PublishStage::Completed => "completed",
            PublishStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Publish state artifact data (publish_state.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishStateData {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier (ULID)
    pub run_id: String,

    /// Component being published
    pub component: String,

    /// Requested increment
    pub bump: VersionBump,

    /// Version found in the source before the run
    pub from_version: Version,

    /// Version being published
    pub to_version: Version,

    /// Changelog items recorded in the manifest entry
    #[serde(default)]
    pub changelog: Vec<String>,

    /// Whether the release becomes `stable_version`
    #[serde(default)]
    pub stable: bool,

    /// Current stage
    pub stage: PublishStage,

    /// Stage that was being attempted when the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<PublishStage>,

    /// Error message of the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_sha256: Option<String>,

    /// Number of times the run was started (1 + resumes)
    pub attempt: u32,

    /// When the run was created
    pub created_at: DateTime<Utc>,

    /// When the state was last updated
    pub updated_at: DateTime<Utc>,
}

/// Errors for publish state operations
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition {
        from: PublishStage,
        to: PublishStage,
    },

    #[error("Run already completed")]
    AlreadyCompleted,

    #[error("IO error on {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl PublishStateData {
    /// Create a new run in PENDING stage
    pub fn new(
        run_id: String,
        component: impl Into<String>,
        bump: VersionBump,
        from_version: Version,
        to_version: Version,
    ) -> Self {
        let now = now_utc();
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            run_id,
            component: component.into(),
            bump,
            from_version,
            to_version,
            changelog: Vec::new(),
            stable: false,
            stage: PublishStage::Pending,
            failed_stage: None,
            error: None,
            archive_path: None,
            archive_sha256: None,
            attempt: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the release notes so a resumed run publishes the same entry
    pub fn with_release(mut self, changelog: Vec<String>, stable: bool) -> Self {
        self.changelog = changelog;
        self.stable = stable;
        self
    }

    /// Transition to a new stage
    pub fn transition(&mut self, stage: PublishStage) -> Result<(), StateError> {
        if !self.stage.can_transition_to(stage) {
            return Err(StateError::InvalidTransition {
                from: self.stage,
                to: stage,
            });
        }

        tracing::info!(
            run_id = %self.run_id,
            version = %self.to_version,
            "stage {} -> {}",
            self.stage,
            stage
        );
        self.stage = stage;
        self.updated_at = now_utc();
        Ok(())
    }

    /// Advance to the next stage
    pub fn advance(&mut self) -> Result<PublishStage, StateError> {
        let next = self.stage.next().ok_or(StateError::InvalidTransition {
            from: self.stage,
            to: self.stage,
        })?;
        self.transition(next)?;
        Ok(next)
    }

    /// Mark the run failed while attempting the stage after the current one
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), StateError> {
        let attempted = self.stage.next();
        self.transition(PublishStage::Failed)?;
        self.failed_stage = attempted;
        self.error = Some(error.into());
        Ok(())
    }

    /// Record the built archive
    pub fn record_archive(&mut self, path: PathBuf, sha256: String) {
        self.archive_path = Some(path);
        self.archive_sha256 = Some(sha256);
        self.updated_at = now_utc();
    }

    /// Restart an unfinished run from PENDING, keeping its target version
    pub fn restart(&mut self) -> Result<(), StateError> {
        if self.stage == PublishStage::Completed {
            return Err(StateError::AlreadyCompleted);
        }
        self.stage = PublishStage::Pending;
        self.failed_stage = None;
        self.error = None;
        self.attempt += 1;
        self.updated_at = now_utc();
        Ok(())
    }

    /// True unless the run reached COMPLETED
    pub fn is_unfinished(&self) -> bool {
        self.stage != PublishStage::Completed
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), StateError> {
        let json = self.to_json()?;
        let io_err = |source: io::Error| StateError::IoError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let temp_path = path.with_extension("json.tmp");
        let result = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(io_err(e));
        }
        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, StateError> {
        let json = fs::read_to_string(path).map_err(|source| StateError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json(&json)?)
    }

    /// Load from file, `None` when no state has been written yet
    pub fn load_optional(path: &Path) -> Result<Option<Self>, StateError> {
        match fs::read_to_string(path) {
            Ok(json) => Ok(Some(Self::from_json(&json)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StateError::IoError {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_state() -> PublishStateData {
        PublishStateData::new(
            "01J0000000000000000000TEST".to_string(),
            "demo-plugin",
            VersionBump::Minor,
            Version::new(1, 2, 3),
            Version::new(1, 3, 0),
        )
    }

    #[test]
    fn test_new_state() {
        let state = new_state();
        assert_eq!(state.stage, PublishStage::Pending);
        assert_eq!(state.attempt, 1);
        assert!(state.failed_stage.is_none());
        assert!(state.is_unfinished());
    }

    #[test]
    fn test_full_stage_sequence() {
        let mut state = new_state();
        let mut seen = Vec::new();
        while state.stage != PublishStage::Completed {
            seen.push(state.advance().unwrap());
        }

        assert_eq!(
            seen,
            vec![
                PublishStage::VersionRewritten,
                PublishStage::ArchiveBuilt,
                PublishStage::ManifestWritten,
                PublishStage::ArchiveUploaded,
                PublishStage::Completed,
            ]
        );
        assert!(!state.is_unfinished());
    }

    #[test]
    fn test_cannot_skip_stages() {
        let mut state = new_state();
        let result = state.transition(PublishStage::ManifestWritten);
        assert!(matches!(result, Err(StateError::InvalidTransition { .. })));
    }

    #[test]
    fn test_terminal_no_transition() {
        let mut state = new_state();
        state.fail("boom").unwrap();

        assert!(state.advance().is_err());
        assert!(state.transition(PublishStage::Failed).is_err());
    }

    #[test]
    fn test_fail_records_attempted_stage() {
        let mut state = new_state();
        state.advance().unwrap();
        state.advance().unwrap();
        state.advance().unwrap();

        state.fail("upload refused").unwrap();

        assert_eq!(state.stage, PublishStage::Failed);
        assert_eq!(state.failed_stage, Some(PublishStage::ArchiveUploaded));
        assert_eq!(state.error.as_deref(), Some("upload refused"));
    }

    #[test]
    fn test_restart_keeps_target() {
        let mut state = new_state().with_release(vec!["Fixed upload".to_string()], true);
        state.advance().unwrap();
        state.fail("disk full").unwrap();

        state.restart().unwrap();

        assert_eq!(state.stage, PublishStage::Pending);
        assert_eq!(state.to_version, Version::new(1, 3, 0));
        assert_eq!(state.attempt, 2);
        assert_eq!(state.changelog, vec!["Fixed upload"]);
        assert!(state.stable);
        assert!(state.error.is_none());
        assert!(state.failed_stage.is_none());
    }

    #[test]
    fn test_restart_completed_rejected() {
        let mut state = new_state();
        while state.advance().is_ok() {}

        assert!(matches!(state.restart(), Err(StateError::AlreadyCompleted)));
    }

    #[test]
    fn test_serialization() {
        let json = new_state().to_json().unwrap();

        assert!(json.contains("\"stage\": \"PENDING\""));
        assert!(json.contains("\"bump\": \"minor\""));
        assert!(json.contains("\"to_version\": \"1.3.0\""));
        assert!(!json.contains("failed_stage"));
    }

    #[test]
    fn test_write_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dist").join(STATE_FILE_NAME);

        assert!(PublishStateData::load_optional(&path).unwrap().is_none());

        let mut state = new_state().with_release(vec!["Added retry".to_string()], true);
        state.advance().unwrap();
        state.record_archive(dir.path().join("demo-plugin-1.3.0.zip"), "ab".repeat(32));
        state.write_to_file(&path).unwrap();

        let loaded = PublishStateData::load_optional(&path).unwrap().unwrap();
        assert_eq!(loaded.run_id, state.run_id);
        assert_eq!(loaded.stage, PublishStage::VersionRewritten);
        assert_eq!(loaded.archive_sha256, state.archive_sha256);
        assert_eq!(loaded.changelog, vec!["Added retry"]);
        assert!(loaded.stable);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_state_without_release_notes_loads() {
        let mut value = serde_json::to_value(new_state()).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("changelog");
        object.remove("stable");

        let state: PublishStateData = serde_json::from_value(value).unwrap();
        assert!(state.changelog.is_empty());
        assert!(!state.stable);
    }

    #[test]
    fn test_from_file_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            PublishStateData::from_file(&path),
            Err(StateError::JsonError(_))
        ));
    }
}
