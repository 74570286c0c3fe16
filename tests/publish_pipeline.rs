//! Integration tests: full publish runs against a temp plugin directory
//!
//! Uploads go to a `DirectoryUploader` mirror, or to a recording uploader
//! that can be told to reject archives.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::NaiveDate;
use plugin_publish::config::{EffectiveConfig, PublishConfig};
use plugin_publish::pipeline::{self, PublishError, PublishRequest, ReleasePublisher};
use plugin_publish::state::{PublishStage, PublishStateData, STATE_FILE_NAME};
use plugin_publish::upload::{
    ContentType, DirectoryUploader, UploadError, UploadedObject, Uploader,
};
use plugin_publish::VersionBump;
use semver::Version;
use tempfile::TempDir;
use update_manifest::Manifest;

const MAIN_FILE: &str = "<?php\n\
/**\n\
 * Plugin Name: Demo Plugin\n\
 * Version: 1.2.3\n\
 */\n\
define( 'DEMO_PLUGIN_VERSION', '1.2.3' );\n";

fn config() -> PublishConfig {
    config_from(None, serde_json::json!({}))
}

/// Settings from an optional TOML file plus extra `archive` overrides
fn config_from(file: Option<&Path>, archive: serde_json::Value) -> PublishConfig {
    let cli = serde_json::json!({
        "plugin": {
            "slug": "demo-plugin",
            "main_file": "demo-plugin.php",
            "version_constant": "DEMO_PLUGIN_VERSION",
            "domain": "https://plugins.example.com"
        },
        "storage": {
            "bucket": "releases",
            "public_url": "https://cdn.example.com/"
        },
        "archive": archive
    });
    EffectiveConfig::build(file, Vec::new(), Some(cli))
        .unwrap()
        .settings()
        .unwrap()
}

/// Plugin tree with a secret, a logs dir, an excluded dir and a nested archive
fn plugin_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    fs::write(root.join("demo-plugin.php"), MAIN_FILE).unwrap();
    fs::write(root.join(".env"), "R2_SECRET_ACCESS_KEY=hunter2\n").unwrap();
    fs::create_dir_all(root.join("includes")).unwrap();
    fs::write(root.join("includes/upload.php"), "<?php // upload\n").unwrap();
    fs::create_dir_all(root.join("logs")).unwrap();
    fs::write(root.join("logs/debug.log"), "noise\n").unwrap();
    fs::create_dir_all(root.join("old")).unwrap();
    fs::write(root.join("old/report.tar.gz"), b"\x1f\x8b").unwrap();
    fs::create_dir_all(root.join("py")).unwrap();
    fs::write(root.join("py/build.py"), "print('hi')\n").unwrap();

    dir
}

fn request(dir: &Path, bump: VersionBump, stable: bool) -> PublishRequest {
    PublishRequest {
        source_dir: dir.to_path_buf(),
        bump,
        changelog: vec!["Fixed upload".to_string(), "Added retry".to_string()],
        stable,
        resume: false,
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
}

fn archive_names(path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    archive.file_names().map(String::from).collect()
}

/// Mirrors into a directory, records keys in order, and can reject archives
struct RecordingUploader {
    inner: DirectoryUploader,
    keys: Mutex<Vec<String>>,
    reject_archives: AtomicBool,
}

impl RecordingUploader {
    fn new(root: PathBuf) -> Self {
        Self {
            inner: DirectoryUploader::new(root),
            keys: Mutex::new(Vec::new()),
            reject_archives: AtomicBool::new(false),
        }
    }

    fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

impl Uploader for RecordingUploader {
    fn put_object(
        &self,
        local: &Path,
        key: &str,
        content_type: ContentType,
    ) -> Result<UploadedObject, UploadError> {
        if content_type == ContentType::Zip && self.reject_archives.load(Ordering::SeqCst) {
            return Err(UploadError::Rejected {
                key: key.to_string(),
                reason: "bucket unavailable".to_string(),
            });
        }
        let object = self.inner.put_object(local, key, content_type)?;
        self.keys.lock().unwrap().push(key.to_string());
        Ok(object)
    }
}

#[test]
fn test_publish_minor_release_end_to_end() {
    let plugin = plugin_dir();
    let bucket = TempDir::new().unwrap();
    let publisher = ReleasePublisher::new(config(), DirectoryUploader::new(bucket.path()))
        .with_today(today());

    let outcome = publisher
        .publish(&request(plugin.path(), VersionBump::Minor, true))
        .unwrap();

    assert_eq!(outcome.from_version, Version::new(1, 2, 3));
    assert_eq!(outcome.to_version, Version::new(1, 3, 0));
    assert_eq!(outcome.archive.file_name, "demo-plugin-1.3.0.zip");
    assert_eq!(
        outcome.download_url,
        "https://cdn.example.com/releases/demo-plugin-1.3.0.zip"
    );
    assert_eq!(outcome.attempt, 1);

    // Both markers rewritten
    let source = fs::read_to_string(plugin.path().join("demo-plugin.php")).unwrap();
    assert!(source.contains("Version: 1.3.0"));
    assert!(source.contains("define( 'DEMO_PLUGIN_VERSION', '1.3.0' );"));

    // Manifest written locally and mirrored
    let manifest = Manifest::from_json(&fs::read_to_string(&outcome.manifest_path).unwrap()).unwrap();
    assert_eq!(manifest.plugin, "demo-plugin");
    assert_eq!(manifest.versions[0].version, Version::new(1, 3, 0));
    assert_eq!(manifest.versions[0].download_url, outcome.download_url);
    assert_eq!(manifest.versions[0].last_updated, today());
    assert_eq!(
        manifest.versions[0].changelog,
        "<h4>1.3.0</h4><ul><li>Fixed upload</li><li>Added retry</li></ul>"
    );
    assert_eq!(manifest.stable_version, Some(Version::new(1, 3, 0)));
    assert!(bucket.path().join("update.json").exists());
    assert!(bucket.path().join("demo-plugin-1.3.0.zip").exists());

    let state = PublishStateData::from_file(&plugin.path().join("dist").join(STATE_FILE_NAME)).unwrap();
    assert_eq!(state.stage, PublishStage::Completed);
    assert_eq!(state.archive_sha256.as_deref(), Some(outcome.archive.sha256.as_str()));
}

#[test]
fn test_archive_contents_follow_exclusion_rules() {
    let plugin = plugin_dir();
    let bucket = TempDir::new().unwrap();
    let publisher = ReleasePublisher::new(config(), DirectoryUploader::new(bucket.path()))
        .with_today(today());

    let outcome = publisher
        .publish(&request(plugin.path(), VersionBump::Patch, false))
        .unwrap();
    let names = archive_names(&outcome.archive.path);

    assert!(names.contains(&"demo-plugin/demo-plugin.php".to_string()));
    assert!(names.contains(&"demo-plugin/includes/upload.php".to_string()));
    assert!(names.contains(&"demo-plugin/logs/".to_string()));
    assert!(names.iter().all(|n| n.starts_with("demo-plugin/")));

    assert!(!names.iter().any(|n| n.ends_with(".env")));
    assert!(!names.iter().any(|n| n.contains("debug.log")));
    assert!(!names.iter().any(|n| n.contains("report.tar.gz")));
    assert!(!names.iter().any(|n| n.contains("/py/")));
    // The output directory never archives itself
    assert!(!names.iter().any(|n| n.contains("/dist/")));

    // Not marked stable: nothing to point at yet
    let manifest = pipeline::load_manifest(publisher.config(), plugin.path()).unwrap();
    assert_eq!(manifest.stable_version, None);
}

#[test]
fn test_archive_uploaded_before_manifest() {
    let plugin = plugin_dir();
    let bucket = TempDir::new().unwrap();
    let publisher = ReleasePublisher::new(config(), RecordingUploader::new(bucket.path().into()))
        .with_today(today());

    let outcome = publisher
        .publish(&request(plugin.path(), VersionBump::Patch, false))
        .unwrap();

    assert_eq!(
        publisher.uploader().keys(),
        vec!["demo-plugin-1.2.4.zip".to_string(), "update.json".to_string()]
    );
    assert_eq!(outcome.uploaded[0].content_type, ContentType::Zip);
    assert_eq!(outcome.uploaded[1].content_type, ContentType::Json);
}

#[test]
fn test_failed_upload_then_resume() {
    let plugin = plugin_dir();
    let bucket = TempDir::new().unwrap();
    let publisher = ReleasePublisher::new(config(), RecordingUploader::new(bucket.path().into()))
        .with_today(today());
    let state_path = plugin.path().join("dist").join(STATE_FILE_NAME);

    publisher.uploader().reject_archives.store(true, Ordering::SeqCst);
    let err = publisher
        .publish(&request(plugin.path(), VersionBump::Minor, false))
        .unwrap_err();
    assert!(matches!(err, PublishError::Upload(UploadError::Rejected { .. })));

    let state = PublishStateData::from_file(&state_path).unwrap();
    assert_eq!(state.stage, PublishStage::Failed);
    assert_eq!(state.failed_stage, Some(PublishStage::ArchiveUploaded));
    assert_eq!(state.to_version, Version::new(1, 3, 0));
    assert!(state.error.as_deref().unwrap().contains("bucket unavailable"));
    assert!(publisher.uploader().keys().is_empty());

    // A fresh publish refuses to start over the unfinished one
    let err = publisher
        .publish(&request(plugin.path(), VersionBump::Minor, false))
        .unwrap_err();
    match err {
        PublishError::UnfinishedRun { version, stage, .. } => {
            assert_eq!(version, Version::new(1, 3, 0));
            assert_eq!(stage, PublishStage::ArchiveUploaded);
        }
        other => panic!("expected UnfinishedRun, got {:?}", other),
    }

    // Resume finishes 1.3.0 without bumping again
    publisher.uploader().reject_archives.store(false, Ordering::SeqCst);
    let mut resume = request(plugin.path(), VersionBump::Minor, false);
    resume.resume = true;
    let outcome = publisher.publish(&resume).unwrap();

    assert_eq!(outcome.run_id, state.run_id);
    assert_eq!(outcome.to_version, Version::new(1, 3, 0));
    assert_eq!(outcome.attempt, 2);

    let source = fs::read_to_string(plugin.path().join("demo-plugin.php")).unwrap();
    assert!(source.contains("Version: 1.3.0"));

    let manifest = pipeline::load_manifest(publisher.config(), plugin.path()).unwrap();
    assert_eq!(manifest.versions.len(), 1);
    assert_eq!(
        publisher.uploader().keys(),
        vec!["demo-plugin-1.3.0.zip".to_string(), "update.json".to_string()]
    );

    let state = pipeline::load_state(publisher.config(), plugin.path())
        .unwrap()
        .unwrap();
    assert_eq!(state.stage, PublishStage::Completed);
    assert_eq!(state.failed_stage, None);
}

#[test]
fn test_successive_releases_and_mark_stable() {
    let plugin = plugin_dir();
    let bucket = TempDir::new().unwrap();
    let publisher = ReleasePublisher::new(config(), DirectoryUploader::new(bucket.path()))
        .with_today(today());

    publisher
        .publish(&request(plugin.path(), VersionBump::Patch, true))
        .unwrap();
    publisher
        .publish(&request(plugin.path(), VersionBump::Major, false))
        .unwrap();

    let manifest = pipeline::load_manifest(publisher.config(), plugin.path()).unwrap();
    let versions: Vec<String> = manifest.versions.iter().map(|e| e.version.to_string()).collect();
    assert_eq!(versions, vec!["2.0.0", "1.2.4"]);
    assert_eq!(manifest.stable_version, Some(Version::new(1, 2, 4)));

    let manifest = publisher
        .mark_stable(plugin.path(), &Version::new(2, 0, 0))
        .unwrap();
    assert_eq!(manifest.stable_version, Some(Version::new(2, 0, 0)));

    let mirrored =
        Manifest::from_json(&fs::read_to_string(bucket.path().join("update.json")).unwrap()).unwrap();
    assert_eq!(mirrored.stable_version, Some(Version::new(2, 0, 0)));
    assert_eq!(mirrored.versions.len(), 2);
}

#[test]
fn test_missing_version_marker_fails_before_any_write() {
    let plugin = plugin_dir();
    fs::write(plugin.path().join("demo-plugin.php"), "<?php\n// no header\n").unwrap();
    let bucket = TempDir::new().unwrap();
    let publisher = ReleasePublisher::new(config(), DirectoryUploader::new(bucket.path()));

    let err = publisher
        .publish(&request(plugin.path(), VersionBump::Patch, false))
        .unwrap_err();

    assert!(matches!(err, PublishError::Version(_)));
    assert!(!plugin.path().join("dist/update.json").exists());
    assert!(fs::read_dir(bucket.path()).unwrap().next().is_none());
}

#[test]
fn test_config_files_never_archived() {
    let plugin = plugin_dir();
    let default_file = plugin.path().join("publish.toml");
    fs::write(
        &default_file,
        "[storage]\naccess_key_id = \"AKIA\"\nsecret_access_key = \"hunter2\"\n",
    )
    .unwrap();
    let custom_file = plugin.path().join("release.toml");
    fs::write(&custom_file, "[storage]\nsecret_access_key = \"hunter3\"\n").unwrap();

    let bucket = TempDir::new().unwrap();
    let config = config_from(Some(&default_file), serde_json::json!({}));
    assert_eq!(config.storage.secret_access_key.as_deref(), Some("hunter2"));
    let publisher = ReleasePublisher::new(config, DirectoryUploader::new(bucket.path()))
        .with_config_file(&custom_file)
        .with_today(today());

    let outcome = publisher
        .publish(&request(plugin.path(), VersionBump::Patch, false))
        .unwrap();
    let names = archive_names(&outcome.archive.path);

    assert!(names.contains(&"demo-plugin/demo-plugin.php".to_string()));
    assert!(!names.iter().any(|n| n.ends_with("publish.toml")));
    assert!(!names.iter().any(|n| n.ends_with("release.toml")));
}

#[test]
fn test_output_dir_inside_plugin_root() {
    let plugin = plugin_dir();
    let bucket = TempDir::new().unwrap();
    let config = config_from(None, serde_json::json!({"output_dir": "."}));
    let publisher = ReleasePublisher::new(config, DirectoryUploader::new(bucket.path()))
        .with_today(today());

    publisher
        .publish(&request(plugin.path(), VersionBump::Patch, false))
        .unwrap();
    assert!(plugin.path().join("update.json").exists());
    assert!(plugin.path().join(STATE_FILE_NAME).exists());

    // The second build walks a root holding the manifest, its lock and the state
    let outcome = publisher
        .publish(&request(plugin.path(), VersionBump::Patch, false))
        .unwrap();
    let names = archive_names(&outcome.archive.path);

    assert!(names.contains(&"demo-plugin/demo-plugin.php".to_string()));
    assert!(!names.iter().any(|n| n.ends_with("update.json")));
    assert!(!names.iter().any(|n| n.ends_with("update.json.lock")));
    assert!(!names.iter().any(|n| n.ends_with(STATE_FILE_NAME)));
    assert!(!names.iter().any(|n| n.ends_with(".zip")));
}

#[test]
fn test_foreign_manifest_keys_survive_publish() {
    let plugin = plugin_dir();
    fs::create_dir_all(plugin.path().join("dist")).unwrap();
    let seeded = serde_json::json!({
        "plugin": "demo-plugin",
        "name": "Demo Plugin",
        "versions": [{
            "version": "1.2.3",
            "download_url": "https://cdn.example.com/releases/demo-plugin-1.2.3.zip",
            "plugin_url": "https://plugins.example.com/demo-plugin",
            "last_updated": "2026-09-01",
            "changelog": "<h4>1.2.3</h4><ul><li>Initial</li></ul>",
            "requires": "5.8",
            "tested": "6.6",
            "requires_php": "7.4",
            "banners": {"low": "l.jpg", "high": "h.jpg"},
            "icons": {"1x": "1.png", "2x": "2.png"},
            "sections": {"faq": "keep me"}
        }],
        "stable_version": "1.2.3"
    });
    fs::write(plugin.path().join("dist/update.json"), seeded.to_string()).unwrap();

    let bucket = TempDir::new().unwrap();
    let publisher = ReleasePublisher::new(config(), DirectoryUploader::new(bucket.path()))
        .with_today(today());
    publisher
        .publish(&request(plugin.path(), VersionBump::Minor, false))
        .unwrap();

    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(plugin.path().join("dist/update.json")).unwrap())
            .unwrap();
    assert_eq!(saved["name"], "Demo Plugin");
    assert_eq!(saved["stable_version"], "1.2.3");
    assert_eq!(saved["versions"][0]["version"], "1.3.0");
    assert_eq!(saved["versions"][1]["sections"]["faq"], "keep me");
}

#[test]
fn test_resume_reuses_recorded_release_notes() {
    let plugin = plugin_dir();
    let bucket = TempDir::new().unwrap();
    let publisher = ReleasePublisher::new(config(), RecordingUploader::new(bucket.path().into()))
        .with_today(today());

    publisher.uploader().reject_archives.store(true, Ordering::SeqCst);
    publisher
        .publish(&request(plugin.path(), VersionBump::Patch, true))
        .unwrap_err();

    let state = pipeline::load_state(publisher.config(), plugin.path())
        .unwrap()
        .unwrap();
    assert_eq!(state.changelog, vec!["Fixed upload", "Added retry"]);
    assert!(state.stable);

    // Resume with nothing re-entered: the recorded values win
    publisher.uploader().reject_archives.store(false, Ordering::SeqCst);
    let resume = PublishRequest {
        source_dir: plugin.path().to_path_buf(),
        bump: VersionBump::Patch,
        changelog: Vec::new(),
        stable: false,
        resume: true,
    };
    let outcome = publisher.publish(&resume).unwrap();
    assert!(outcome.stable);

    let manifest = pipeline::load_manifest(publisher.config(), plugin.path()).unwrap();
    assert_eq!(manifest.stable_version, Some(Version::new(1, 2, 4)));
    assert_eq!(
        manifest.versions[0].changelog,
        "<h4>1.2.4</h4><ul><li>Fixed upload</li><li>Added retry</li></ul>"
    );
}
