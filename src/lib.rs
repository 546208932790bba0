//! offline-shell - versioned offline caching for a single-origin web app shell.
//!
//! A build step hands the worker a resource table (asset path to content
//! hash) and a core set (the paths the shell needs to boot). The worker keeps
//! three cache partitions in sync with that table across deploys:
//!
//! - **install** fetches the core set into a staging partition, bypassing
//!   HTTP caches,
//! - **activate** evicts entries whose hash changed since the last activated
//!   table, then promotes staging,
//! - **fetch** answers requests for table members cache-first (the root
//!   document online-first) and passes everything else through,
//! - **downloadOffline** fills in whatever table members are still missing.
//!
//! # Example
//!
//! ```no_run
//! use offline_shell::{
//!     CacheReconciler, Event, FetchConfig, HttpFetcher, MemoryStorage, Origin, Request,
//!     ResourceManifest, ResourceTable, Worker,
//! };
//!
//! # async fn example() -> offline_shell::Result<()> {
//! let table: ResourceTable = [("/", "3f1a"), ("main.dart.js", "9bc2")].into_iter().collect();
//! let manifest = ResourceManifest::new(table, ["/", "main.dart.js"])?;
//!
//! let reconciler = CacheReconciler::new(
//!     MemoryStorage::new(),
//!     HttpFetcher::new(&FetchConfig::default())?,
//!     Origin::parse("https://game.example.com")?,
//!     manifest,
//! );
//! let worker = Worker::new(reconciler);
//!
//! worker.dispatch(Event::Install).await?;
//! let outcome = worker
//!     .dispatch(Event::Fetch(Request::get("https://game.example.com/main.dart.js")))
//!     .await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod origin;
pub mod reconciler;
pub mod resources;
pub mod stats;
pub mod storage;
pub mod worker;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export main types for convenience
pub use config::{AppConfig, FetchConfig, PartitionNames, StorageConfig};
pub use error::{Error, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use http::{CacheMode, Method, Request, Response};
pub use origin::Origin;
pub use reconciler::{
    ActivationReport, CacheReconciler, FetchOutcome, MANIFEST_KEY, NoProgress, SyncProgress,
};
pub use resources::{CoreSet, ResourceManifest, ResourceTable};
pub use stats::{SyncStats, SyncStatsBuilder};
pub use storage::{CacheStorage, DiskStorage, MemoryStorage};
pub use worker::{Command, Event, EventOutcome, Worker, WorkerState};
