//! Update Manifest
//!
//! Model and persistence for the `update.json` document served on a plugin
//! update channel. Update-checking clients read this file to discover the
//! published versions and the recommended (stable) one.

pub mod entry;
pub mod error;
pub mod manifest;
pub mod store;

pub use entry::{render_changelog, Banners, Icons, VersionEntry};
pub use error::ManifestError;
pub use manifest::Manifest;
pub use store::{CorruptPolicy, ManifestStore};

/// Default file name of the manifest on the update channel.
pub const MANIFEST_FILE_NAME: &str = "update.json";
