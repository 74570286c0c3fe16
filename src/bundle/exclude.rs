//! Exclusion rules for plugin archives
//!
//! Decides, per relative path, whether an entry goes into the archive.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Directories whose whole subtree is left out
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &["py", "old"];

/// Extensions of already-compressed files
pub const DEFAULT_COMPRESSED_EXTENSIONS: &[&str] =
    &[".zip", ".tar", ".gz", ".tgz", ".bz2", ".rar", ".7z"];

/// Local secret file, never shipped
pub const DEFAULT_SECRET_FILE: &str = ".env";

/// Directory shipped as an empty entry
pub const DEFAULT_LOGS_DIR: &str = "logs";

/// Errors for exclusion rules
#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("Glob pattern error: {0}")]
    GlobError(#[from] globset::Error),
}

/// What the archive does with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Archive the file
    Include,
    /// Archive the directory as an empty entry and skip everything below it
    EmptyDir,
    /// Leave out (the whole subtree, for directories)
    Exclude,
}

/// Exclusion rules for filtering archive entries
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    excluded_dirs: BTreeSet<String>,
    compressed_extensions: BTreeSet<String>,
    secret_file: String,
    logs_dir: String,
    patterns: GlobSet,
    skip_paths: Vec<PathBuf>,
}

impl Default for ExcludeRules {
    fn default() -> Self {
        Self {
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
            compressed_extensions: DEFAULT_COMPRESSED_EXTENSIONS
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            secret_file: DEFAULT_SECRET_FILE.to_string(),
            logs_dir: DEFAULT_LOGS_DIR.to_string(),
            patterns: GlobSet::empty(),
            skip_paths: Vec::new(),
        }
    }
}

impl ExcludeRules {
    /// Create rules with the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the excluded directory names
    pub fn with_excluded_dirs<S: AsRef<str>>(mut self, dirs: &[S]) -> Self {
        self.excluded_dirs = dirs.iter().map(|d| d.as_ref().to_string()).collect();
        self
    }

    /// Replace the compressed extensions (with or without leading dot)
    pub fn with_compressed_extensions<S: AsRef<str>>(mut self, extensions: &[S]) -> Self {
        self.compressed_extensions = extensions
            .iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    /// Set the secret file name
    pub fn with_secret_file(mut self, name: impl Into<String>) -> Self {
        self.secret_file = name.into();
        self
    }

    /// Set the name of the directory kept as an empty entry
    pub fn with_logs_dir(mut self, name: impl Into<String>) -> Self {
        self.logs_dir = name.into();
        self
    }

    /// Add glob patterns matched against the slash-separated relative path
    pub fn with_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self, ExcludeError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if !pattern.is_empty() {
                builder.add(Glob::new(pattern)?);
            }
        }
        self.patterns = builder.build()?;
        Ok(self)
    }

    /// Skip one relative path (and its subtree)
    pub fn with_skip_path(mut self, rel_path: impl Into<PathBuf>) -> Self {
        let rel_path = rel_path.into();
        if !rel_path.as_os_str().is_empty() {
            self.skip_paths.push(rel_path);
        }
        self
    }

    /// Decide what to do with a directory at `rel_path`
    pub fn classify_dir(&self, rel_path: &Path) -> Decision {
        if self.is_skipped(rel_path) || self.in_excluded_dir(rel_path) {
            return Decision::Exclude;
        }
        if self.matches_pattern(rel_path) {
            return Decision::Exclude;
        }
        if rel_path.file_name().map(|n| n == self.logs_dir.as_str()).unwrap_or(false) {
            return Decision::EmptyDir;
        }
        Decision::Include
    }

    /// Decide what to do with a file at `rel_path`
    pub fn classify_file(&self, rel_path: &Path) -> Decision {
        let parent = rel_path.parent().unwrap_or(Path::new(""));
        if self.is_skipped(rel_path) || self.in_excluded_dir(parent) {
            return Decision::Exclude;
        }
        if self.under_logs_dir(rel_path) {
            return Decision::Exclude;
        }
        if rel_path.file_name().map(|n| n == self.secret_file.as_str()).unwrap_or(false) {
            return Decision::Exclude;
        }
        if self.is_compressed(rel_path) {
            return Decision::Exclude;
        }
        if self.matches_pattern(rel_path) {
            return Decision::Exclude;
        }
        Decision::Include
    }

    /// True when any component of `dir` is an excluded directory name
    fn in_excluded_dir(&self, dir: &Path) -> bool {
        normal_components(dir).any(|c| self.excluded_dirs.contains(c))
    }

    fn under_logs_dir(&self, rel_path: &Path) -> bool {
        rel_path
            .parent()
            .map(|parent| normal_components(parent).any(|c| c == self.logs_dir))
            .unwrap_or(false)
    }

    fn is_compressed(&self, rel_path: &Path) -> bool {
        rel_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.compressed_extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    fn is_skipped(&self, rel_path: &Path) -> bool {
        self.skip_paths.iter().any(|skip| rel_path.starts_with(skip))
    }

    fn matches_pattern(&self, rel_path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let slash_path: Vec<&str> = normal_components(rel_path).collect();
        self.patterns.is_match(slash_path.join("/"))
    }
}

fn normal_components(path: &Path) -> impl Iterator<Item = &str> {
    path.components().filter_map(|c| match c {
        Component::Normal(name) => name.to_str(),
        _ => None,
    })
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}
