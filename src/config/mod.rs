//! Configuration merge system
//!
//! Implements the 4-layer configuration merge:
//! 1. Built-in defaults
//! 2. Config file (`--config`, or `<source>/publish.toml` when present)
//! 3. Environment (`R2_*`, `PLUGIN_DOMAIN`)
//! 4. CLI flags
//!
//! The merged JSON value deserializes into [`PublishConfig`].

mod defaults;
mod effective;
mod merge;

pub use defaults::BuiltinDefaults;
pub use effective::{
    env_layer, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, ENV_BINDINGS,
};
pub use merge::{deep_merge, merge_layers};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use update_manifest::CorruptPolicy;

use crate::bundle::{ExcludeError, ExcludeRules};

/// Default config file name looked up in the plugin directory
pub const DEFAULT_CONFIG_FILE: &str = "publish.toml";

/// Typed view of the merged configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub plugin: PluginSettings,
    pub storage: StorageSettings,
    pub archive: ArchiveSettings,
    pub manifest: ManifestSettings,
    pub lock_timeout_seconds: u64,
}

/// Plugin identity and compatibility metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Component identifier, also the default archive label
    pub slug: String,

    /// Main source file carrying the version markers, relative to the plugin directory
    pub main_file: PathBuf,

    /// Name of the compiled-in version constant
    pub version_constant: String,

    /// Top-level folder inside the archive (defaults to the slug)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Base URL of the plugin site
    pub domain: String,

    pub requires: String,
    pub tested: String,
    pub requires_php: String,
}

impl PluginSettings {
    /// Archive label: explicit label, or the slug
    pub fn archive_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.slug)
    }

    /// `<domain>/<slug>`
    pub fn plugin_url(&self) -> String {
        format!("{}/{}", self.domain.trim_end_matches('/'), self.slug)
    }

    /// Asset URL under `<domain>/updates/`
    pub fn asset_url(&self, rel: &str) -> String {
        format!(
            "{}/updates/{}",
            self.domain.trim_end_matches('/'),
            rel.trim_start_matches('/')
        )
    }
}

/// Object storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub bucket: String,

    /// Public base URL the bucket is served from
    pub public_url: String,

    /// S3-compatible endpoint and credentials (`R2_*`). Read only by an
    /// object-store [`Uploader`](crate::upload::Uploader) implementation;
    /// [`DirectoryUploader`](crate::upload::DirectoryUploader) ignores them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,

    /// Prefix prepended to every object key
    #[serde(default)]
    pub key_prefix: String,

    /// Local directory objects are mirrored into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_dir: Option<PathBuf>,
}

impl StorageSettings {
    /// Object key for a file name
    pub fn object_key(&self, file_name: &str) -> String {
        format!("{}{}", self.key_prefix, file_name)
    }

    /// `<public_url>/<bucket>/<key>` with redundant slashes trimmed
    pub fn download_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_url.trim_end_matches('/'),
            self.bucket.trim_matches('/'),
            key.trim_start_matches('/')
        )
    }
}

/// Archive exclusion and output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSettings {
    pub excluded_dirs: Vec<String>,
    pub compressed_extensions: Vec<String>,
    pub secret_file: String,
    pub logs_dir: String,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Output directory; relative paths resolve against the plugin directory
    pub output_dir: PathBuf,
}

impl ArchiveSettings {
    /// Exclusion rules described by these settings
    pub fn rules(&self) -> Result<ExcludeRules, ExcludeError> {
        ExcludeRules::new()
            .with_excluded_dirs(&self.excluded_dirs)
            .with_compressed_extensions(&self.compressed_extensions)
            .with_secret_file(self.secret_file.clone())
            .with_logs_dir(self.logs_dir.clone())
            .with_patterns(&self.exclude_patterns)
    }

    /// Resolved output directory for a plugin directory
    pub fn output_dir_for(&self, source_dir: &Path) -> PathBuf {
        if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            source_dir.join(&self.output_dir)
        }
    }
}

/// Manifest location and recovery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSettings {
    /// File name inside the output directory
    pub file_name: String,

    #[serde(default)]
    pub on_corrupt: CorruptPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PublishConfig {
        let cli = serde_json::json!({
            "plugin": {
                "slug": "demo-plugin",
                "main_file": "demo-plugin.php",
                "version_constant": "DEMO_PLUGIN_VERSION",
                "domain": "https://plugins.example.com/"
            },
            "storage": {
                "bucket": "/releases/",
                "public_url": "https://cdn.example.com/",
                "key_prefix": "demo/"
            }
        });
        EffectiveConfig::build(None, Vec::new(), Some(cli))
            .unwrap()
            .settings()
            .unwrap()
    }

    #[test]
    fn test_url_assembly() {
        let config = settings();

        let key = config.storage.object_key("demo-plugin-1.3.0.zip");
        assert_eq!(key, "demo/demo-plugin-1.3.0.zip");
        assert_eq!(
            config.storage.download_url(&key),
            "https://cdn.example.com/releases/demo/demo-plugin-1.3.0.zip"
        );
        assert_eq!(
            config.plugin.plugin_url(),
            "https://plugins.example.com/demo-plugin"
        );
        assert_eq!(
            config.plugin.asset_url("banners/low.jpg"),
            "https://plugins.example.com/updates/banners/low.jpg"
        );
    }

    #[test]
    fn test_archive_label_defaults_to_slug() {
        let mut config = settings();
        assert_eq!(config.plugin.archive_label(), "demo-plugin");

        config.plugin.label = Some("demo".to_string());
        assert_eq!(config.plugin.archive_label(), "demo");
    }

    #[test]
    fn test_output_dir_resolution() {
        let mut config = settings();
        let source = Path::new("/work/demo-plugin");

        assert_eq!(
            config.archive.output_dir_for(source),
            PathBuf::from("/work/demo-plugin/dist")
        );

        config.archive.output_dir = PathBuf::from("/srv/out");
        assert_eq!(config.archive.output_dir_for(source), PathBuf::from("/srv/out"));
    }

    #[test]
    fn test_rules_from_settings() {
        let mut config = settings();
        config.archive.exclude_patterns = vec!["**/*.map".to_string()];

        let rules = config.archive.rules().unwrap();
        assert_eq!(
            rules.classify_file(Path::new("js/app.js.map")),
            crate::bundle::Decision::Exclude
        );
        assert_eq!(
            rules.classify_file(Path::new("py/tool.py")),
            crate::bundle::Decision::Exclude
        );
    }

    #[test]
    fn test_default_corrupt_policy() {
        assert_eq!(settings().manifest.on_corrupt, CorruptPolicy::Fail);
    }
}
