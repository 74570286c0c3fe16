//! Plugin Publish CLI
//!
//! Entry point for the `plugin-publish` command-line tool.

use clap::{Parser, Subcommand};
use plugin_publish::config::{ConfigError, EffectiveConfig, DEFAULT_CONFIG_FILE};
use plugin_publish::config::PublishConfig;
use plugin_publish::pipeline::{self, PublishOutcome, ReleasePublisher};
use plugin_publish::prompt::{Prompter, RequestDraft};
use plugin_publish::state::PublishStateData;
use plugin_publish::{DirectoryUploader, VersionBump};
use semver::Version;
use serde_json::{json, Map, Value};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "plugin-publish")]
#[command(about = "Version, package and publish a plugin to its update channel", version)]
struct Cli {
    /// Plugin directory (publish prompts for it, other commands use the current directory)
    #[arg(long, short = 's', global = true)]
    source: Option<PathBuf>,

    /// Config file (default: <source>/publish.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Output directory for the archive and manifest (default: <source>/dist)
    #[arg(long, global = true)]
    publish_dir: Option<PathBuf>,

    /// Local directory uploads are mirrored into
    #[arg(long, global = true)]
    mirror_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bump the version, build the archive, update the manifest and upload
    Publish {
        /// Version increment: patch, minor or major
        #[arg(long, short = 'b')]
        bump: Option<String>,

        /// Changelog item (repeatable)
        #[arg(long = "changelog", short = 'm')]
        changelog: Vec<String>,

        /// Mark the new version as stable
        #[arg(long, conflicts_with = "not_stable")]
        stable: bool,

        /// Do not mark the new version as stable (skips the prompt)
        #[arg(long)]
        not_stable: bool,

        /// Finish the last unfinished publish
        #[arg(long)]
        resume: bool,
    },

    /// Point stable_version at a published version
    MarkStable {
        /// Version to mark (must already be in the manifest)
        version: String,
    },

    /// List published versions from the local manifest
    Versions {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the last publish run
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration with secrets redacted
    ShowConfig,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdin = io::stdin();
    let mut prompter = Prompter::new(stdin.lock(), io::stderr());

    // Only publish asks for the directory; the read-only commands use the cwd
    let source_dir = match (cli.source.clone(), &cli.command) {
        (Some(dir), _) => dir,
        (None, Commands::Publish { .. }) => exit_on_err(prompter.source_dir(), "Error"),
        (None, _) => PathBuf::from("."),
    };

    match &cli.command {
        Commands::Publish {
            bump,
            changelog,
            stable,
            not_stable,
            resume,
        } => {
            let bump = bump.as_deref().map(|b| exit_on_err(b.parse::<VersionBump>(), "Error"));
            let stable = match (*stable, *not_stable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let draft = RequestDraft {
                source_dir: Some(source_dir.clone()),
                bump,
                changelog: changelog.clone(),
                stable,
                resume: *resume,
            };
            run_publish(&cli, &source_dir, draft, &mut prompter);
        }
        Commands::MarkStable { version } => run_mark_stable(&cli, &source_dir, version),
        Commands::Versions { json } => run_versions(&cli, &source_dir, *json),
        Commands::Status { json } => run_status(&cli, &source_dir, *json),
        Commands::ShowConfig => run_show_config(&cli, &source_dir),
    }
}

fn init_tracing(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn exit_on_err<T, E: std::fmt::Display>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("{}: {}", context, e);
            process::exit(1);
        }
    }
}

/// CLI flags that override config values
fn cli_overrides(cli: &Cli) -> Option<Value> {
    let mut archive = Map::new();
    let mut storage = Map::new();
    if let Some(dir) = &cli.publish_dir {
        archive.insert("output_dir".to_string(), json!(dir));
    }
    if let Some(dir) = &cli.mirror_dir {
        storage.insert("mirror_dir".to_string(), json!(dir));
    }
    if archive.is_empty() && storage.is_empty() {
        return None;
    }
    Some(json!({ "archive": archive, "storage": storage }))
}

fn config_path(cli: &Cli, source_dir: &Path) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| source_dir.join(DEFAULT_CONFIG_FILE))
}

fn load_config(cli: &Cli, source_dir: &Path) -> Result<EffectiveConfig, ConfigError> {
    let file = config_path(cli, source_dir);

    if cli.config.is_some() && !file.exists() {
        return Err(ConfigError::IoError(format!(
            "config file not found: {}",
            file.display()
        )));
    }

    EffectiveConfig::build(Some(&file), std::env::vars(), cli_overrides(cli))
}

fn load_settings(cli: &Cli, source_dir: &Path) -> PublishConfig {
    let effective = exit_on_err(load_config(cli, source_dir), "Configuration error");
    exit_on_err(effective.settings(), "Configuration error")
}

fn build_publisher(cli: &Cli, source_dir: &Path) -> ReleasePublisher<DirectoryUploader> {
    let config = load_settings(cli, source_dir);

    let Some(mirror_dir) = config.storage.mirror_dir.clone() else {
        eprintln!(
            "Configuration error: storage.mirror_dir is not set; \
             no uploader is available (use --mirror-dir or set it in {})",
            DEFAULT_CONFIG_FILE
        );
        process::exit(1);
    };

    ReleasePublisher::new(config, DirectoryUploader::new(mirror_dir))
        .with_config_file(config_path(cli, source_dir))
}

fn run_publish<R: BufRead, W: Write>(
    cli: &Cli,
    source_dir: &Path,
    draft: RequestDraft,
    prompter: &mut Prompter<R, W>,
) {
    let publisher = build_publisher(cli, source_dir);

    if !draft.resume {
        let current = exit_on_err(publisher.current_version(source_dir), "Error");
        eprintln!("Current version: {}", current);
    }

    let request = exit_on_err(prompter.complete(draft), "Error");
    let outcome = exit_on_err(publisher.publish(&request), "Publish failed");
    print_outcome(&outcome);
}

fn print_outcome(outcome: &PublishOutcome) {
    println!(
        "Published {} (was {})",
        outcome.to_version, outcome.from_version
    );
    println!("  Archive: {} ({} bytes)", outcome.archive.path.display(), outcome.archive.size);
    println!("  SHA-256: {}", outcome.archive.sha256);
    println!("  Download URL: {}", outcome.download_url);
    println!("  Manifest: {}", outcome.manifest_path.display());
    for object in &outcome.uploaded {
        println!("  Uploaded: {} ({})", object.key, object.content_type);
    }
    if outcome.stable {
        println!("  Marked stable");
    }
    if outcome.attempt > 1 {
        println!("  Resumed run {} (attempt {})", outcome.run_id, outcome.attempt);
    }
}

fn run_mark_stable(cli: &Cli, source_dir: &Path, version: &str) {
    let version = exit_on_err(Version::parse(version.trim()), "Invalid version");
    let publisher = build_publisher(cli, source_dir);

    let manifest = exit_on_err(publisher.mark_stable(source_dir, &version), "Error");
    println!(
        "Stable version of {} is now {}",
        manifest.plugin, version
    );
}

fn run_versions(cli: &Cli, source_dir: &Path, json: bool) {
    let config = load_settings(cli, source_dir);
    let manifest = exit_on_err(pipeline::load_manifest(&config, source_dir), "Error");

    if json {
        println!("{}", exit_on_err(manifest.to_json(), "Error serializing output"));
        return;
    }

    if manifest.versions.is_empty() {
        println!("No versions published for {}", manifest.plugin);
        return;
    }

    println!("{}:", manifest.plugin);
    for entry in &manifest.versions {
        let marker = if manifest.stable_version.as_ref() == Some(&entry.version) {
            "  (stable)"
        } else {
            ""
        };
        println!("  {:<12} {}{}", entry.version.to_string(), entry.last_updated, marker);
    }
}

fn run_status(cli: &Cli, source_dir: &Path, json: bool) {
    let config = load_settings(cli, source_dir);
    let state = exit_on_err(pipeline::load_state(&config, source_dir), "Error");

    let Some(state) = state else {
        println!("No publish has been recorded");
        return;
    };

    if json {
        println!("{}", exit_on_err(state.to_json(), "Error serializing output"));
    } else {
        print_state(&state);
    }
}

fn print_state(state: &PublishStateData) {
    println!("Run {} ({})", state.run_id, state.component);
    println!(
        "  Version: {} -> {} ({})",
        state.from_version, state.to_version, state.bump
    );
    println!("  Stage: {}", state.stage);
    if let Some(failed) = state.failed_stage {
        println!("  Failed during: {}", failed);
    }
    if let Some(error) = &state.error {
        println!("  Error: {}", error);
    }
    if let Some(path) = &state.archive_path {
        println!("  Archive: {}", path.display());
    }
    println!("  Attempt: {}", state.attempt);
    println!("  Updated: {}", state.updated_at.to_rfc3339());
    if state.is_unfinished() {
        println!("  Unfinished: run `plugin-publish publish --resume` to finish it");
    }
}

fn run_show_config(cli: &Cli, source_dir: &Path) {
    let effective = exit_on_err(load_config(cli, source_dir), "Configuration error");
    println!(
        "{}",
        exit_on_err(effective.to_redacted_json(), "Error serializing output")
    );
}
