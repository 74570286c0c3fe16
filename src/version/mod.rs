//! Version resolution and advancement
//!
//! The plugin's main file carries its version twice:
//! - a header line `Version: 1.2.3`
//! - a compiled-in constant `define('PLUGIN_VERSION', '1.2.3')`
//!
//! The header is the source of truth for the current version; both markers
//! are rewritten together when a new version is published.

mod source;

pub use source::SourceFile;

use regex_lite::{Captures, Regex};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

/// Header marker pattern
const HEADER_PATTERN: &str = r"(Version:\s*)(\d+(?:\.\d+)*)";

/// Increment kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionBump {
    /// Bug fixes
    Patch,
    /// Backwards-compatible features
    Minor,
    /// Breaking changes
    Major,
}

impl VersionBump {
    /// Apply the bump. Pre-release and build metadata are dropped.
    pub fn apply(&self, version: &Version) -> Version {
        match self {
            VersionBump::Major => Version::new(version.major + 1, 0, 0),
            VersionBump::Minor => Version::new(version.major, version.minor + 1, 0),
            VersionBump::Patch => Version::new(version.major, version.minor, version.patch + 1),
        }
    }

    /// Accepted spellings, for prompts and error messages
    pub const VARIANTS: &'static [&'static str] = &["patch", "minor", "major"];
}

impl FromStr for VersionBump {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patch" => Ok(VersionBump::Patch),
            "minor" => Ok(VersionBump::Minor),
            "major" => Ok(VersionBump::Major),
            _ => Err(VersionError::InvalidIncrement(s.to_string())),
        }
    }
}

impl fmt::Display for VersionBump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionBump::Patch => write!(f, "patch"),
            VersionBump::Minor => write!(f, "minor"),
            VersionBump::Major => write!(f, "major"),
        }
    }
}

/// Errors for version operations
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("source file {path} cannot be read: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no 'Version:' marker found in source")]
    VersionNotFound,

    #[error("version marker '{found}' is not a major.minor.patch version: {source}")]
    MalformedVersion {
        found: String,
        #[source]
        source: semver::Error,
    },

    #[error("invalid increment '{0}', expected one of: patch, minor, major")]
    InvalidIncrement(String),

    #[error("version marker not found: {0}")]
    MarkerMissing(String),

    #[error("failed to write source file {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Extract the version from the first `Version:` marker
pub fn current_version(source_text: &str) -> Result<Version, VersionError> {
    let caps = header_regex()
        .captures(source_text)
        .ok_or(VersionError::VersionNotFound)?;

    let found = &caps[2];
    Version::parse(found).map_err(|source| VersionError::MalformedVersion {
        found: found.to_string(),
        source,
    })
}

/// Compute the version following `current`
pub fn next_version(current: &Version, bump: VersionBump) -> Version {
    bump.apply(current)
}

/// Rewrite both version markers to `new_version`.
///
/// Returns the new text; fails without producing any text when either
/// marker is absent.
pub fn rewrite_version_markers(
    source_text: &str,
    constant_name: &str,
    new_version: &Version,
) -> Result<String, VersionError> {
    let rendered = new_version.to_string();

    let header = header_regex();
    if !header.is_match(source_text) {
        return Err(VersionError::MarkerMissing("Version: header".to_string()));
    }
    let text = header.replace(source_text, |caps: &Captures| {
        format!("{}{}", &caps[1], rendered)
    });

    let constant = constant_regex(constant_name);
    if !constant.is_match(&text) {
        return Err(VersionError::MarkerMissing(format!(
            "define('{}', ...) constant",
            constant_name
        )));
    }
    let text = constant.replace(&text, |caps: &Captures| {
        format!("{}{}{}", &caps[1], rendered, &caps[2])
    });

    Ok(text.into_owned())
}

fn header_regex() -> Regex {
    Regex::new(HEADER_PATTERN).expect("header pattern is valid")
}

fn constant_regex(constant_name: &str) -> Regex {
    let pattern = format!(
        r#"(define\s*\(\s*['"]{}['"]\s*,\s*['"])\d+(?:\.\d+)*(['"])"#,
        regex_lite::escape(constant_name)
    );
    Regex::new(&pattern).expect("escaped constant pattern is valid")
}
