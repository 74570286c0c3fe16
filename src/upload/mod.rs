//! Upload seam
//!
//! The object store is an external collaborator. The publisher only talks to
//! the [`Uploader`] trait:
//! - `put_object` must not return success before the object is durable
//! - `upload_file` assigns the content type from the file name
//!
//! [`DirectoryUploader`] mirrors objects into a local directory (a mounted
//! bucket, or a test fixture).

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

/// Content type of an uploaded object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// The manifest
    Json,
    /// Archives and everything else
    Zip,
}

impl ContentType {
    /// `application/json` for `.json` files, `application/zip` otherwise
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ContentType::Json,
            _ => ContentType::Zip,
        }
    }

    /// MIME type string
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Zip => "application/zip",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload errors
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error uploading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("Upload rejected for {key}: {reason}")]
    Rejected { key: String, reason: String },
}

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub key: String,
    pub content_type: ContentType,
    pub size: u64,
}

/// Upload interface to the object store
pub trait Uploader: Send + Sync {
    /// Store `local` under `key`. Returns once the object is durable.
    fn put_object(
        &self,
        local: &Path,
        key: &str,
        content_type: ContentType,
    ) -> Result<UploadedObject, UploadError>;

    /// Store `local` under `key` with the content type for its file name
    fn upload_file(&self, local: &Path, key: &str) -> Result<UploadedObject, UploadError> {
        let content_type = ContentType::for_path(local);
        let object = self.put_object(local, key, content_type)?;
        tracing::info!(
            key = %object.key,
            content_type = %object.content_type,
            bytes = object.size,
            "uploaded {}",
            local.display()
        );
        Ok(object)
    }
}

/// Uploader that mirrors objects into a local directory
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    root: PathBuf,
}

impl DirectoryUploader {
    /// Mirror into `root` (created on first upload)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Mirror directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path an object key maps to
    pub fn object_path(&self, key: &str) -> Result<PathBuf, UploadError> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(UploadError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

impl Uploader for DirectoryUploader {
    fn put_object(
        &self,
        local: &Path,
        key: &str,
        content_type: ContentType,
    ) -> Result<UploadedObject, UploadError> {
        let dest = self.object_path(key)?;
        let io_err = |path: &Path, source: io::Error| UploadError::Io {
            path: path.to_path_buf(),
            source,
        };

        let bytes = fs::read(local).map_err(|e| io_err(local, e))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let mut temp_name = dest.as_os_str().to_owned();
        temp_name.push(".upload");
        let temp_path = PathBuf::from(temp_name);

        let result = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &dest)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(io_err(&dest, e));
        }

        Ok(UploadedObject {
            key: key.to_string(),
            content_type,
            size: bytes.len() as u64,
        })
    }
}
