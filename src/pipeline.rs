//! Release pipeline
//!
//! [`ReleasePublisher`] runs one publish as a linear sequence of named
//! stages (see [`crate::state`]):
//! - rewrite the version markers in the main plugin file
//! - build the archive
//! - merge the new entry into the manifest and save it
//! - upload the archive, then the manifest
//!
//! The state is persisted after every stage. Nothing is retried; the first
//! failure marks the run FAILED and is returned to the caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use semver::Version;
use thiserror::Error;
use update_manifest::{
    render_changelog, Banners, Icons, Manifest, ManifestError, ManifestStore, VersionEntry,
};

use crate::bundle::{ArchiveBuilder, ArchiveError, ArchiveResult};
use crate::config::{PublishConfig, DEFAULT_CONFIG_FILE};
use crate::lock::{LockError, ManifestLock};
use crate::state::{PublishStage, PublishStateData, StateError, STATE_FILE_NAME};
use crate::upload::{UploadError, UploadedObject, Uploader};
use crate::version::{next_version, SourceFile, VersionBump, VersionError};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("changelog cannot be empty")]
    EmptyChangelog,

    #[error("plugin directory does not exist: {0}")]
    SourceDirMissing(PathBuf),

    #[error(
        "an unfinished publish of {version} exists (run {run_id}, stage {stage}); \
         rerun with --resume to finish it"
    )]
    UnfinishedRun {
        run_id: String,
        version: Version,
        stage: PublishStage,
    },

    #[error("no unfinished publish to resume")]
    NothingToResume,

    #[error("state file belongs to {found}, expected {expected}")]
    StateMismatch { expected: String, found: String },

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// Result type for pipeline operations
pub type PublishResult<T> = Result<T, PublishError>;

/// What to publish
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Plugin directory
    pub source_dir: PathBuf,

    /// Increment kind (ignored when resuming)
    pub bump: VersionBump,

    /// Changelog items, one per line (a resumed run keeps the recorded ones)
    pub changelog: Vec<String>,

    /// Point `stable_version` at the new release (recorded like `changelog`)
    pub stable: bool,

    /// Finish an unfinished run instead of starting a new one
    pub resume: bool,
}

/// Files a publish touches for one plugin directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPaths {
    pub source_dir: PathBuf,
    pub main_file: PathBuf,
    pub output_dir: PathBuf,
    pub manifest: PathBuf,
    pub state: PathBuf,
}

impl PublishPaths {
    /// Resolve paths for `source_dir`, which must exist
    pub fn resolve(config: &PublishConfig, source_dir: &Path) -> PublishResult<Self> {
        let source_dir = fs::canonicalize(source_dir)
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| PublishError::SourceDirMissing(source_dir.to_path_buf()))?;

        let output_dir = config.archive.output_dir_for(&source_dir);
        Ok(Self {
            main_file: source_dir.join(&config.plugin.main_file),
            manifest: output_dir.join(&config.manifest.file_name),
            state: output_dir.join(STATE_FILE_NAME),
            output_dir,
            source_dir,
        })
    }
}

/// Result of a completed publish
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub run_id: String,
    pub from_version: Version,
    pub to_version: Version,
    pub archive: ArchiveResult,
    pub download_url: String,
    pub manifest_path: PathBuf,
    pub uploaded: Vec<UploadedObject>,
    pub stable: bool,
    /// 1 for a fresh run, more after resumes
    pub attempt: u32,
}

/// Orchestrates a publish
pub struct ReleasePublisher<U: Uploader> {
    config: PublishConfig,
    uploader: U,
    today: NaiveDate,
    config_file: Option<PathBuf>,
}

impl<U: Uploader> ReleasePublisher<U> {
    /// Create a publisher dated today (local time)
    pub fn new(config: PublishConfig, uploader: U) -> Self {
        Self {
            config,
            uploader,
            today: Local::now().date_naive(),
            config_file: None,
        }
    }

    /// Override the `last_updated` date
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Config file the settings were read from, kept out of the archive
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.config_file = Some(fs::canonicalize(&path).unwrap_or(path));
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Uploader in use
    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    /// Publish a new version, or finish an unfinished one with `resume`
    pub fn publish(&self, request: &PublishRequest) -> PublishResult<PublishOutcome> {
        if !request.resume && is_blank(&request.changelog) {
            return Err(PublishError::EmptyChangelog);
        }

        let paths = PublishPaths::resolve(&self.config, &request.source_dir)?;
        let _lock = ManifestLock::acquire(&paths.manifest, self.lock_timeout())?;

        let source = SourceFile::new(&paths.main_file, &self.config.plugin.version_constant);
        let mut state = self.start_state(request, &paths, &source)?;
        if is_blank(&state.changelog) {
            return Err(PublishError::EmptyChangelog);
        }
        state.write_to_file(&paths.state)?;

        match self.run_stages(&mut state, &paths, &source) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(state_err) = state.fail(err.to_string()) {
                    tracing::warn!(error = %state_err, "could not mark run failed");
                }
                if let Err(write_err) = state.write_to_file(&paths.state) {
                    tracing::warn!(error = %write_err, "could not persist failed state");
                }
                tracing::error!(
                    run_id = %state.run_id,
                    failed_stage = ?state.failed_stage,
                    "publish failed: {}",
                    err
                );
                Err(err)
            }
        }
    }

    /// New state, or the restarted unfinished one when resuming
    fn start_state(
        &self,
        request: &PublishRequest,
        paths: &PublishPaths,
        source: &SourceFile,
    ) -> PublishResult<PublishStateData> {
        let existing = PublishStateData::load_optional(&paths.state)?
            .filter(PublishStateData::is_unfinished);

        match (existing, request.resume) {
            (Some(mut state), true) => {
                if state.component != self.config.plugin.slug {
                    return Err(PublishError::StateMismatch {
                        expected: self.config.plugin.slug.clone(),
                        found: state.component,
                    });
                }
                state.restart()?;
                // State files from before release notes were recorded
                if is_blank(&state.changelog) {
                    state.changelog = request.changelog.clone();
                    state.stable = request.stable;
                } else if request.changelog != state.changelog || request.stable != state.stable {
                    tracing::info!("resuming with the changelog and stable flag of the failed run");
                }
                tracing::info!(
                    run_id = %state.run_id,
                    attempt = state.attempt,
                    "resuming publish of {}",
                    state.to_version
                );
                Ok(state)
            }
            (Some(state), false) => Err(PublishError::UnfinishedRun {
                run_id: state.run_id,
                version: state.to_version,
                stage: state.failed_stage.unwrap_or(state.stage),
            }),
            (None, true) => Err(PublishError::NothingToResume),
            (None, false) => {
                let current = source.current_version()?;
                let next = next_version(&current, request.bump);
                tracing::info!("current version: {}", current);
                tracing::info!("new version: {}", next);
                Ok(PublishStateData::new(
                    ulid::Ulid::new().to_string(),
                    &self.config.plugin.slug,
                    request.bump,
                    current,
                    next,
                )
                .with_release(request.changelog.clone(), request.stable))
            }
        }
    }

    fn run_stages(
        &self,
        state: &mut PublishStateData,
        paths: &PublishPaths,
        source: &SourceFile,
    ) -> PublishResult<PublishOutcome> {
        let version = state.to_version.clone();
        let changelog = state.changelog.clone();
        let stable = state.stable;

        // PENDING -> VERSION_REWRITTEN
        if source.rewrite_version(&version)? {
            tracing::info!(file = %source.path().display(), "updated version markers to {}", version);
        } else {
            tracing::info!("source already carries {}", version);
        }
        self.checkpoint(state, paths)?;

        // VERSION_REWRITTEN -> ARCHIVE_BUILT
        let archive = self
            .archive_builder(paths)?
            .build(self.config.plugin.archive_label(), &version, &paths.output_dir)?;
        state.record_archive(archive.path.clone(), archive.sha256.clone());
        self.checkpoint(state, paths)?;

        // ARCHIVE_BUILT -> MANIFEST_WRITTEN
        let archive_key = self.config.storage.object_key(&archive.file_name);
        let download_url = self.config.storage.download_url(&archive_key);
        let store = self.manifest_store(paths);
        let mut manifest = store.load()?;
        manifest.upsert_version(self.version_entry(&version, &download_url, &changelog));
        if stable {
            manifest.mark_stable(&version)?;
            tracing::info!("marked version {} as stable", version);
        }
        store.save(&manifest)?;
        self.checkpoint(state, paths)?;

        // MANIFEST_WRITTEN -> ARCHIVE_UPLOADED
        let mut uploaded = Vec::with_capacity(2);
        uploaded.push(self.uploader.upload_file(&archive.path, &archive_key)?);
        self.checkpoint(state, paths)?;

        // ARCHIVE_UPLOADED -> COMPLETED
        uploaded.push(self.upload_manifest(paths)?);
        self.checkpoint(state, paths)?;

        tracing::info!(run_id = %state.run_id, "publish complete, version {} uploaded", version);

        Ok(PublishOutcome {
            run_id: state.run_id.clone(),
            from_version: state.from_version.clone(),
            to_version: version,
            archive,
            download_url,
            manifest_path: paths.manifest.clone(),
            uploaded,
            stable,
            attempt: state.attempt,
        })
    }

    /// Builder for the plugin tree, minus every file this pipeline owns.
    ///
    /// The output dir may be the plugin dir itself, so the manifest, its lock
    /// and the state file are skipped individually. Config files can hold
    /// storage credentials.
    fn archive_builder(&self, paths: &PublishPaths) -> PublishResult<ArchiveBuilder> {
        let mut builder = ArchiveBuilder::new(paths.source_dir.clone())
            .with_rules(self.config.archive.rules().map_err(ArchiveError::from)?)
            .with_skip_path(&paths.output_dir)
            .with_skip_path(&paths.manifest)
            .with_skip_path(&ManifestLock::lock_path_for(&paths.manifest))
            .with_skip_path(&paths.state)
            .with_skip_path(&paths.source_dir.join(DEFAULT_CONFIG_FILE));
        if let Some(config_file) = &self.config_file {
            builder = builder.with_skip_path(config_file);
        }
        Ok(builder)
    }

    fn checkpoint(&self, state: &mut PublishStateData, paths: &PublishPaths) -> PublishResult<()> {
        state.advance()?;
        state.write_to_file(&paths.state)?;
        Ok(())
    }

    /// Point `stable_version` at an already published version and upload the manifest
    pub fn mark_stable(&self, source_dir: &Path, version: &Version) -> PublishResult<Manifest> {
        let paths = PublishPaths::resolve(&self.config, source_dir)?;
        let _lock = ManifestLock::acquire(&paths.manifest, self.lock_timeout())?;

        let store = self.manifest_store(&paths);
        let mut manifest = store.load()?;
        manifest.mark_stable(version)?;
        store.save(&manifest)?;
        self.upload_manifest(&paths)?;

        tracing::info!("marked version {} as stable", version);
        Ok(manifest)
    }

    /// Version currently declared in the plugin's main file
    pub fn current_version(&self, source_dir: &Path) -> PublishResult<Version> {
        let paths = PublishPaths::resolve(&self.config, source_dir)?;
        let source = SourceFile::new(&paths.main_file, &self.config.plugin.version_constant);
        Ok(source.current_version()?)
    }

    fn upload_manifest(&self, paths: &PublishPaths) -> PublishResult<UploadedObject> {
        let key = self.config.storage.object_key(&self.config.manifest.file_name);
        Ok(self.uploader.upload_file(&paths.manifest, &key)?)
    }

    fn manifest_store(&self, paths: &PublishPaths) -> ManifestStore {
        manifest_store(&self.config, paths)
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.config.lock_timeout_seconds)
    }

    /// Manifest entry for `version`
    pub fn version_entry(
        &self,
        version: &Version,
        download_url: &str,
        changelog: &[String],
    ) -> VersionEntry {
        let plugin = &self.config.plugin;
        VersionEntry {
            extra: serde_json::Map::new(),
            version: version.clone(),
            download_url: download_url.to_string(),
            plugin_url: plugin.plugin_url(),
            last_updated: self.today,
            changelog: render_changelog(version, changelog),
            requires: plugin.requires.clone(),
            tested: plugin.tested.clone(),
            requires_php: plugin.requires_php.clone(),
            banners: Banners {
                low: plugin.asset_url("banners/low.jpg"),
                high: plugin.asset_url("banners/high.jpg"),
            },
            icons: Icons {
                x1: plugin.asset_url("icons/icon-128x128.png"),
                x2: plugin.asset_url("icons/icon-256x256.png"),
            },
        }
    }
}

fn is_blank(changelog: &[String]) -> bool {
    changelog.iter().all(|item| item.trim().is_empty())
}

fn manifest_store(config: &PublishConfig, paths: &PublishPaths) -> ManifestStore {
    ManifestStore::new(&paths.manifest, &config.plugin.slug)
        .with_corrupt_policy(config.manifest.on_corrupt)
}

/// Current local manifest of the plugin in `source_dir`
pub fn load_manifest(config: &PublishConfig, source_dir: &Path) -> PublishResult<Manifest> {
    let paths = PublishPaths::resolve(config, source_dir)?;
    Ok(manifest_store(config, &paths).load()?)
}

/// Last recorded publish state, if any
pub fn load_state(
    config: &PublishConfig,
    source_dir: &Path,
) -> PublishResult<Option<PublishStateData>> {
    let paths = PublishPaths::resolve(config, source_dir)?;
    Ok(PublishStateData::load_optional(&paths.state)?)
}
