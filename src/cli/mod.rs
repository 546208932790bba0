//! CLI mode for offline-shell - drive the cache worker from a terminal.
//!
//! Each invocation builds a fresh worker over the on-disk partitions, so the
//! lifecycle state is inferred from what is stored: a leftover staging
//! partition means a worker is installed and waiting, a stored manifest means
//! one is active.

mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use tokio::io::AsyncWriteExt;

use crate::{
    AppConfig, CacheReconciler, CacheStorage, DiskStorage, Error, Event, EventOutcome, Fetcher,
    HttpFetcher, MANIFEST_KEY, PartitionNames, Request, ResourceManifest, Worker, WorkerState,
};

use progress::{CliProgress, print_activation, print_summary};

/// What the invocation should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subcommand {
    /// Stage the core set and leave the worker waiting.
    Install,
    /// Activate a waiting worker.
    Activate,
    /// Install and activate in one go.
    Update,
    /// Answer one GET request through the worker.
    Fetch(String),
    /// Cache every resource not yet stored.
    DownloadOffline,
    /// Show partitions and entry counts.
    Status,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub origin: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub command: Subcommand,
}

/// Parses command line arguments (without the program name).
///
/// Returns `Ok(None)` when help was requested.
///
/// # Errors
///
/// Returns [`Error::Config`] for unknown flags, missing flag values or a
/// missing subcommand.
pub fn parse_args<I>(args: I) -> crate::Result<Option<CliArgs>>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut manifest = None;
    let mut origin = None;
    let mut cache_dir = None;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| Error::Config(format!("{flag} requires a value")))
        };
        let flag = arg.as_str();
        match flag {
            "-h" | "--help" => return Ok(None),
            "-c" | "--config" => config = Some(PathBuf::from(value(flag)?)),
            "-m" | "--manifest" => manifest = Some(PathBuf::from(value(flag)?)),
            "-o" | "--origin" => origin = Some(value(flag)?),
            "-d" | "--cache-dir" => cache_dir = Some(PathBuf::from(value(flag)?)),
            unknown if unknown.starts_with('-') => {
                return Err(Error::Config(format!("unknown option: {unknown}")));
            }
            other => positional.push(other.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("install") => Subcommand::Install,
        Some("activate") => Subcommand::Activate,
        Some("update") => Subcommand::Update,
        Some("fetch") => Subcommand::Fetch(
            positional
                .next()
                .ok_or_else(|| Error::Config("fetch requires a URL".to_string()))?,
        ),
        Some("download-offline") => Subcommand::DownloadOffline,
        Some("status") => Subcommand::Status,
        Some(other) => return Err(Error::Config(format!("unknown command: {other}"))),
        None => return Err(Error::Config("no command given".to_string())),
    };
    if let Some(extra) = positional.next() {
        return Err(Error::Config(format!("unexpected argument: {extra}")));
    }

    Ok(Some(CliArgs {
        config,
        manifest,
        origin,
        cache_dir,
        command,
    }))
}

/// Merges command line overrides into the file configuration.
fn resolve_config(args: &CliArgs) -> crate::Result<AppConfig> {
    let path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&path)?;
    if let Some(origin) = &args.origin {
        config = config.with_origin(origin.clone());
    }
    if let Some(dir) = &args.cache_dir {
        config = config.with_cache_dir(dir.clone());
    }
    Ok(config)
}

fn load_manifest(args: &CliArgs) -> crate::Result<ResourceManifest> {
    let path = args
        .manifest
        .as_ref()
        .ok_or_else(|| Error::Config("--manifest is required for this command".to_string()))?;
    log::debug!("Loading manifest from {}", path.display());
    ResourceManifest::load(path)
}

/// Infers the worker state left behind by earlier invocations.
async fn stored_state<S: CacheStorage>(
    storage: &S,
    partitions: &PartitionNames,
) -> crate::Result<WorkerState> {
    if storage.has_partition(&partitions.staging).await? {
        return Ok(WorkerState::Installed);
    }
    if storage.get(&partitions.manifest, MANIFEST_KEY).await?.is_some() {
        return Ok(WorkerState::Active);
    }
    Ok(WorkerState::Uninstalled)
}

/// Runs the CLI with parsed arguments.
///
/// # Errors
///
/// Returns an error if configuration or the manifest cannot be loaded, or if
/// the command itself fails.
pub async fn run(args: CliArgs) -> crate::Result<()> {
    let config = resolve_config(&args)?;
    let storage = Arc::new(DiskStorage::new(&config.storage.cache_dir));
    log::debug!("Cache directory: {}", storage.root().display());

    if args.command == Subcommand::Status {
        return print_status(storage.as_ref(), &config.partitions).await;
    }

    let manifest = load_manifest(&args)?;
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
    let progress = Arc::new(CliProgress::new());
    let reconciler =
        CacheReconciler::from_config(Arc::clone(&storage), Arc::clone(&fetcher), manifest, &config)?
            .with_progress(progress.clone());

    let state = stored_state(storage.as_ref(), &config.partitions).await?;
    log::debug!("Stored worker state: {state}");

    match args.command {
        Subcommand::Install => {
            println!("Installing core resources...");
            let worker = Worker::new(reconciler).waiting();
            let result = worker.dispatch(Event::Install).await;
            progress.finish();
            if let EventOutcome::Installed { stats, .. } = result? {
                print_summary("Install Summary", &stats);
            }
            println!("Installed. Run 'activate' to switch over.");
        }
        Subcommand::Activate => {
            let worker = Worker::with_state(reconciler, state);
            if let EventOutcome::Activated(report) = worker.dispatch(Event::Activate).await? {
                print_activation(&report);
            }
        }
        Subcommand::Update => {
            println!("Installing core resources...");
            let worker = Worker::new(reconciler);
            let result = worker.dispatch(Event::Install).await;
            progress.finish();
            if let EventOutcome::Installed { stats, activation } = result? {
                print_summary("Install Summary", &stats);
                if let Some(report) = activation {
                    print_activation(&report);
                }
            }
        }
        Subcommand::Fetch(url) => {
            let worker = Worker::with_state(reconciler, state);
            let request = Request::get(url);
            let response = match worker.dispatch(Event::Fetch(request.clone())).await? {
                EventOutcome::Respond(response) => response,
                _ => {
                    log::info!("Not intercepted, fetching directly: {}", request.url);
                    fetcher.fetch(&request).await?
                }
            };
            log::info!(
                "{} {} ({} bytes)",
                response.status,
                response.url,
                response.len()
            );
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&response.body).await?;
            stdout.flush().await?;
        }
        Subcommand::DownloadOffline => {
            let worker = Worker::with_state(reconciler, state);
            let result = worker
                .dispatch(Event::Message("downloadOffline".to_string()))
                .await;
            progress.finish();
            if let EventOutcome::Downloaded(stats) = result? {
                print_summary("Offline Download Summary", &stats);
            }
        }
        Subcommand::Status => {}
    }

    Ok(())
}

async fn print_status<S: CacheStorage>(
    storage: &S,
    partitions: &PartitionNames,
) -> crate::Result<()> {
    println!("{}", style("Cache partitions").bold().cyan());
    let existing = storage.partitions().await?;
    if existing.is_empty() {
        println!("  (none)");
    }
    for name in &existing {
        let role = if *name == partitions.current {
            "current"
        } else if *name == partitions.staging {
            "staging"
        } else if *name == partitions.manifest {
            "manifest"
        } else {
            "unknown"
        };
        let count = storage.keys(name).await?.len();
        println!("  {name:<24} {role:<9} {count} entr{}", if count == 1 { "y" } else { "ies" });
    }

    println!();
    let state = stored_state(storage, partitions).await?;
    println!("{} {state}", style("Worker:").bold());
    Ok(())
}
