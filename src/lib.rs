//! Plugin Publish - versioned release pipeline for a single plugin
//!
//! Resolves the version declared in the plugin's main file, bumps it,
//! packages the plugin into a zip archive, merges the release into the
//! `update.json` manifest and hands both files to an uploader.

pub mod bundle;
pub mod config;
pub mod lock;
pub mod pipeline;
pub mod prompt;
pub mod state;
pub mod upload;
pub mod version;

pub use bundle::{ArchiveBuilder, ArchiveError, ArchiveResult, ExcludeRules};
pub use config::{ConfigError, EffectiveConfig, PublishConfig};
pub use pipeline::{PublishError, PublishOutcome, PublishRequest, ReleasePublisher};
pub use state::{PublishStage, PublishStateData};
pub use upload::{ContentType, DirectoryUploader, UploadError, Uploader};
pub use version::{VersionBump, VersionError};
