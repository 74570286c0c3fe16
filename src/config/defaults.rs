//! Built-in defaults (layer 1)
//!
//! Hardcoded values for everything that has a sensible default. Identity and
//! storage settings (slug, domain, bucket, public URL) have none and must
//! come from a later layer.

use serde::{Deserialize, Serialize};

use crate::bundle::{
    DEFAULT_COMPRESSED_EXTENSIONS, DEFAULT_EXCLUDED_DIRS, DEFAULT_LOGS_DIR, DEFAULT_SECRET_FILE,
};
use update_manifest::MANIFEST_FILE_NAME;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Minimum supported host version (default: "5.8")
    pub requires: String,

    /// Tested-up-to host version (default: "6.6")
    pub tested: String,

    /// Minimum runtime version (default: "7.4")
    pub requires_php: String,

    /// Directory names excluded with their subtree (default: py, old)
    pub excluded_dirs: Vec<String>,

    /// Already-compressed extensions skipped in archives
    pub compressed_extensions: Vec<String>,

    /// Secret file never shipped (default: ".env")
    pub secret_file: String,

    /// Directory shipped empty (default: "logs")
    pub logs_dir: String,

    /// Output directory, relative to the plugin directory (default: "dist")
    pub output_dir: String,

    /// Manifest file name (default: "update.json")
    pub manifest_file: String,

    /// Corrupt manifest handling (default: "fail")
    pub on_corrupt: String,

    /// Manifest lock wait in seconds (default: 30)
    pub lock_timeout_seconds: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            requires: "5.8".to_string(),
            tested: "6.6".to_string(),
            requires_php: "7.4".to_string(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            compressed_extensions: DEFAULT_COMPRESSED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            secret_file: DEFAULT_SECRET_FILE.to_string(),
            logs_dir: DEFAULT_LOGS_DIR.to_string(),
            output_dir: "dist".to_string(),
            manifest_file: MANIFEST_FILE_NAME.to_string(),
            on_corrupt: "fail".to_string(),
            lock_timeout_seconds: 30,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "plugin": {
                "requires": self.requires,
                "tested": self.tested,
                "requires_php": self.requires_php
            },
            "storage": {
                "key_prefix": ""
            },
            "archive": {
                "excluded_dirs": self.excluded_dirs,
                "compressed_extensions": self.compressed_extensions,
                "secret_file": self.secret_file,
                "logs_dir": self.logs_dir,
                "exclude_patterns": [],
                "output_dir": self.output_dir
            },
            "manifest": {
                "file_name": self.manifest_file,
                "on_corrupt": self.on_corrupt
            },
            "lock_timeout_seconds": self.lock_timeout_seconds
        })
    }
}
