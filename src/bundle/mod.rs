//! Plugin archive construction
//!
//! Walks the plugin directory, applies [`ExcludeRules`] and writes a
//! deflate-compressed zip whose entries all live under one top-level folder
//! named after the archive label. Walk order, timestamps and file modes are
//! normalized so the same tree always produces the same bytes.

mod exclude;

pub use exclude::{
    Decision, ExcludeError, ExcludeRules, DEFAULT_COMPRESSED_EXTENSIONS, DEFAULT_EXCLUDED_DIRS,
    DEFAULT_LOGS_DIR, DEFAULT_SECRET_FILE,
};

use semver::Version;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Extension of produced archives
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Errors for archive construction
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Walk error: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("Zip error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Exclude rules error: {0}")]
    ExcludeError(#[from] ExcludeError),

    #[error("Symlink escapes plugin root: {path}")]
    SymlinkEscapesRoot { path: PathBuf },

    #[error("Path is not within plugin root: {0}")]
    PathNotInRoot(PathBuf),
}

/// Kind of a planned archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    /// Directory shipped without its contents
    EmptyDir,
}

/// One planned archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    /// Path inside the archive, `/`-separated, rooted at the label
    pub archive_path: String,
    pub kind: EntryKind,
    /// Where the bytes come from (the link target for symlinked files)
    pub source: PathBuf,
}

/// Mapping of relative source paths to archive entries for one build
#[derive(Debug, Clone, Default)]
pub struct ArchivePlan {
    pub entries: BTreeMap<PathBuf, PlannedEntry>,
}

impl ArchivePlan {
    /// Number of planned entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing would be archived
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Archive paths in write order
    pub fn archive_paths(&self) -> Vec<&str> {
        self.entries.values().map(|e| e.archive_path.as_str()).collect()
    }
}

/// Archive file name for a label and version: `{label}-{major}.{minor}.{patch}.zip`
pub fn archive_file_name(label: &str, version: &Version) -> String {
    format!(
        "{}-{}.{}.{}.{}",
        label, version.major, version.minor, version.patch, ARCHIVE_EXTENSION
    )
}

/// Builder for plugin archives
pub struct ArchiveBuilder {
    /// Plugin directory to archive
    root: PathBuf,
    /// Exclusion rules
    rules: ExcludeRules,
}

impl ArchiveBuilder {
    /// Create a builder for the given plugin directory with default rules
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            rules: ExcludeRules::default(),
        }
    }

    /// Set exclusion rules
    pub fn with_rules(mut self, rules: ExcludeRules) -> Self {
        self.rules = rules;
        self
    }

    /// Leave one path out of the archive.
    ///
    /// Accepts absolute paths; paths outside the root, and the root itself,
    /// are ignored.
    pub fn with_skip_path(mut self, path: &Path) -> Self {
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.root).ok().map(Path::to_path_buf)
        } else {
            Some(path.to_path_buf())
        };
        if let Some(rel) = rel {
            self.rules = self.rules.with_skip_path(rel);
        }
        self
    }

    /// Compute the archive plan for `label`
    pub fn plan(&self, label: &str) -> Result<ArchivePlan, ArchiveError> {
        let mut plan = ArchivePlan::default();
        let canonical_root = self.root.canonicalize()?;

        let mut walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry?;
            let path = entry.path();

            let rel_path = path
                .strip_prefix(&self.root)
                .map_err(|_| ArchiveError::PathNotInRoot(path.to_path_buf()))?;

            // Skip root itself
            if rel_path.as_os_str().is_empty() {
                continue;
            }

            let file_type = entry.file_type();

            if file_type.is_dir() {
                match self.rules.classify_dir(rel_path) {
                    Decision::Include => {}
                    Decision::EmptyDir => {
                        tracing::debug!(path = %rel_path.display(), "keeping directory as empty entry");
                        plan.entries.insert(
                            rel_path.to_path_buf(),
                            PlannedEntry {
                                archive_path: format!("{}/", archive_path(label, rel_path)),
                                kind: EntryKind::EmptyDir,
                                source: path.to_path_buf(),
                            },
                        );
                        walker.skip_current_dir();
                    }
                    Decision::Exclude => {
                        tracing::debug!(path = %rel_path.display(), "excluding directory");
                        walker.skip_current_dir();
                    }
                }
                continue;
            }

            if self.rules.classify_file(rel_path) != Decision::Include {
                tracing::debug!(path = %rel_path.display(), "excluding file");
                continue;
            }

            let source = if file_type.is_symlink() {
                match resolve_symlink(path, &canonical_root)? {
                    Some(target) => target,
                    None => {
                        tracing::debug!(path = %rel_path.display(), "skipping symlink to directory");
                        continue;
                    }
                }
            } else {
                path.to_path_buf()
            };

            plan.entries.insert(
                rel_path.to_path_buf(),
                PlannedEntry {
                    archive_path: archive_path(label, rel_path),
                    kind: EntryKind::File,
                    source,
                },
            );
        }

        Ok(plan)
    }

    /// Build `{label}-{version}.zip` in `out_dir`.
    ///
    /// The archive is written to a `.partial` file first and renamed into
    /// place once complete; on failure the partial file is removed.
    pub fn build(
        &self,
        label: &str,
        version: &Version,
        out_dir: &Path,
    ) -> Result<ArchiveResult, ArchiveError> {
        let plan = self.plan(label)?;

        fs::create_dir_all(out_dir)?;
        let file_name = archive_file_name(label, version);
        let path = out_dir.join(&file_name);
        let partial_path = out_dir.join(format!("{}.partial", file_name));

        if let Err(e) = write_zip(&plan, &partial_path) {
            let _ = fs::remove_file(&partial_path);
            return Err(e);
        }
        fs::rename(&partial_path, &path)?;

        let bytes = fs::read(&path)?;
        let sha256 = hex::encode(Sha256::digest(&bytes));

        tracing::info!(
            archive = %file_name,
            entries = plan.len(),
            bytes = bytes.len(),
            "created archive with top-level folder {}",
            label
        );

        Ok(ArchiveResult {
            path,
            file_name,
            size: bytes.len() as u64,
            sha256,
            entries: plan.archive_paths().into_iter().map(String::from).collect(),
        })
    }
}

/// Result of building an archive
#[derive(Debug, Clone)]
pub struct ArchiveResult {
    /// Location of the finished archive
    pub path: PathBuf,
    /// `{label}-{version}.zip`
    pub file_name: String,
    /// Size in bytes
    pub size: u64,
    /// SHA-256 of the archive bytes
    pub sha256: String,
    /// Archive paths in write order
    pub entries: Vec<String>,
}

fn write_zip(plan: &ArchivePlan, path: &Path) -> Result<(), ArchiveError> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let base = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    for entry in plan.entries.values() {
        match entry.kind {
            EntryKind::EmptyDir => {
                zip.add_directory(entry.archive_path.as_str(), base.unix_permissions(0o755))?;
            }
            EntryKind::File => {
                let mode = if is_executable(&entry.source) { 0o755 } else { 0o644 };
                zip.start_file(entry.archive_path.as_str(), base.unix_permissions(mode))?;
                let mut source = File::open(&entry.source)?;
                io::copy(&mut source, &mut zip)?;
            }
        }
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// `{label}/{rel_path}` with `/` separators
fn archive_path(label: &str, rel_path: &Path) -> String {
    let mut parts = vec![label.to_string()];
    parts.extend(rel_path.components().filter_map(|c| match c {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    }));
    parts.join("/")
}

/// Resolve a symlink found while walking.
///
/// Returns the target when it is a file inside the root, `None` for links to
/// directories, and an error for links leaving the root.
fn resolve_symlink(path: &Path, canonical_root: &Path) -> Result<Option<PathBuf>, ArchiveError> {
    let target = fs::read_link(path)?;
    let resolved = if target.is_absolute() {
        target
    } else {
        path.parent().unwrap_or(path).join(&target)
    };

    let canonical = resolved.canonicalize().unwrap_or(resolved);
    if !canonical.starts_with(canonical_root) {
        return Err(ArchiveError::SymlinkEscapesRoot {
            path: path.to_path_buf(),
        });
    }

    if fs::metadata(&canonical)?.is_dir() {
        return Ok(None);
    }
    Ok(Some(canonical))
}

/// Check if a file is executable
fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(path) {
            return metadata.permissions().mode() & 0o111 != 0;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    false
}
