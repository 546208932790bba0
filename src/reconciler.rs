//! Cache reconciliation and request interception.
//!
//! The reconciler owns three partitions:
//!
//! | Partition | Lifetime | Contents |
//! |-----------|----------|----------|
//! | staging   | install → activate | core set fetched with cache bypass |
//! | current   | long-lived | everything served to clients |
//! | manifest  | long-lived | one `"manifest"` entry: the last activated resource table |
//!
//! Install fills staging. Activation evicts stale entries from current using
//! the stored manifest, promotes staging, and records the new table. Fetches
//! for table members are served cache-first, except the root document which
//! is served online-first.

use std::collections::HashSet;
use std::sync::Arc;

use futures::{StreamExt, stream};

use crate::config::{AppConfig, PartitionNames};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::http::{CacheMode, Method, Request, Response};
use crate::origin::{Origin, ROOT};
use crate::resources::{CoreSet, ResourceManifest, ResourceTable};
use crate::stats::{SyncStats, SyncStatsBuilder};
use crate::storage::CacheStorage;

/// Key of the single entry in the manifest partition.
pub const MANIFEST_KEY: &str = "manifest";

/// Trait for receiving progress updates during bulk fetches.
///
/// All methods have default no-op implementations.
pub trait SyncProgress: Send + Sync {
    /// Called once with the number of resources about to be fetched.
    fn on_batch_start(&self, _count: usize) {}

    /// Called when a resource fetch starts.
    fn on_fetch_start(&self, _url: &str) {}

    /// Called when a resource was fetched successfully.
    fn on_fetch_complete(&self, _url: &str, _bytes: u64) {}

    /// Called when a resource fetch failed.
    fn on_error(&self, _url: &str, _error: &str) {}
}

/// A progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl SyncProgress for NoProgress {}

/// What the fetch handler decided for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs the request itself.
    Passthrough,
    /// Intercepted; respond with this.
    Respond(Response),
}

/// Result of an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationReport {
    /// No prior manifest: current was rebuilt from staging.
    Fresh {
        /// Entries copied from staging.
        promoted: usize,
    },
    /// A prior manifest was reconciled against the new table.
    Upgraded {
        /// Previously cached entries that survived.
        kept: usize,
        /// Previously cached entries that were removed.
        evicted: usize,
        /// Entries copied from staging.
        promoted: usize,
    },
    /// Reconciliation failed and every partition was deleted.
    Cleared {
        /// The error that aborted reconciliation.
        error: String,
    },
}

impl ActivationReport {
    /// Whether the worker should take control of open clients.
    #[must_use]
    pub const fn claims_clients(&self) -> bool {
        !matches!(self, Self::Cleared { .. })
    }
}

/// Drives install, activation, fetch interception and offline download.
pub struct CacheReconciler<S: CacheStorage, F: Fetcher> {
    storage: S,
    fetcher: F,
    origin: Origin,
    partitions: PartitionNames,
    resources: ResourceTable,
    core: CoreSet,
    concurrent_fetches: usize,
    progress: Arc<dyn SyncProgress>,
}

impl<S: CacheStorage, F: Fetcher> CacheReconciler<S, F> {
    /// Creates a reconciler with default partition names.
    #[must_use]
    pub fn new(storage: S, fetcher: F, origin: Origin, manifest: ResourceManifest) -> Self {
        Self {
            storage,
            fetcher,
            origin,
            partitions: PartitionNames::default(),
            resources: manifest.resources,
            core: manifest.core,
            concurrent_fetches: 4,
            progress: Arc::new(NoProgress),
        }
    }

    /// Creates a reconciler using partition names and fetch limits from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the config has no valid origin.
    pub fn from_config(
        storage: S,
        fetcher: F,
        manifest: ResourceManifest,
        config: &AppConfig,
    ) -> Result<Self> {
        let origin = config
            .origin
            .as_deref()
            .ok_or_else(|| Error::Config("origin is not set".to_string()))?;
        Ok(Self::new(storage, fetcher, Origin::parse(origin)?, manifest)
            .with_partitions(config.partitions.clone())
            .with_concurrent_fetches(config.fetch.concurrent_fetches))
    }

    /// Overrides the partition names.
    #[must_use]
    pub fn with_partitions(mut self, partitions: PartitionNames) -> Self {
        self.partitions = partitions;
        self
    }

    /// Sets how many requests bulk fetches run at once.
    #[must_use]
    pub fn with_concurrent_fetches(mut self, concurrent: usize) -> Self {
        self.concurrent_fetches = concurrent.max(1);
        self
    }

    /// Sets the progress sink for bulk fetches.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn SyncProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Returns the underlying storage.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the origin.
    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Returns the resource table.
    #[must_use]
    pub const fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// Returns the partition names.
    #[must_use]
    pub const fn partitions(&self) -> &PartitionNames {
        &self.partitions
    }

    // ------------------------------------------------------------------
    // Install
    // ------------------------------------------------------------------

    /// Fetches the core set into staging, bypassing HTTP caches.
    ///
    /// All-or-nothing: staging is only created once every core resource has
    /// been fetched with a 2xx status, and is removed again if storing fails.
    /// A failed install leaves no trace in storage.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or storage failure.
    pub async fn install(&self) -> Result<SyncStats> {
        let mut stats = SyncStatsBuilder::new();

        let urls = self.core.iter().map(|p| self.origin.resolve(p)).collect();
        let fetched = self.fetch_all(urls, CacheMode::Reload).await?;

        if let Err(e) = self.stage(&fetched, &mut stats).await {
            if let Err(err) = self.storage.delete_partition(&self.partitions.staging).await {
                log::error!("Failed to drop partial {}: {err}", self.partitions.staging);
            }
            return Err(e);
        }

        let stats = stats.build();
        log::info!(
            "Staged {} core resource(s) in {}",
            stats.fetched,
            self.partitions.staging
        );
        Ok(stats)
    }

    async fn stage(
        &self,
        fetched: &[(Request, Response)],
        stats: &mut SyncStatsBuilder,
    ) -> Result<()> {
        let staging = &self.partitions.staging;
        self.storage.open(staging).await?;
        for (request, response) in fetched {
            self.storage
                .put(staging, request.cache_key(), response)
                .await?;
            stats.add_fetch(response.len());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Activate
    // ------------------------------------------------------------------

    /// Reconciles current against the stored manifest and promotes staging.
    ///
    /// Never fails: if any step errors, every partition is deleted and the
    /// returned report carries the error.
    pub async fn activate(&self) -> ActivationReport {
        match self.reconcile().await {
            Ok(report) => {
                log::info!("Activation complete: {report:?}");
                report
            }
            Err(e) => {
                log::error!("Failed to upgrade cache: {e}");
                let p = &self.partitions;
                for partition in [&p.current, &p.staging, &p.manifest] {
                    if let Err(err) = self.storage.delete_partition(partition).await {
                        log::error!("Failed to delete partition {partition}: {err}");
                    }
                }
                ActivationReport::Cleared {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn reconcile(&self) -> Result<ActivationReport> {
        let p = &self.partitions;
        self.storage.open(&p.current).await?;
        self.storage.open(&p.staging).await?;
        self.storage.open(&p.manifest).await?;

        let Some(stored) = self.storage.get(&p.manifest, MANIFEST_KEY).await? else {
            log::info!("No prior manifest, rebuilding {}", p.current);
            self.storage.delete_partition(&p.current).await?;
            self.storage.open(&p.current).await?;
            let promoted = self.promote_staging().await?;
            self.save_manifest().await?;
            return Ok(ActivationReport::Fresh { promoted });
        };

        let old = ResourceTable::from_json(&stored.body)
            .map_err(|e| Error::Manifest(format!("stored manifest is unreadable: {e}")))?;

        let mut kept = 0;
        let mut evicted = 0;
        for key in self.storage.keys(&p.current).await? {
            let path = self.origin.key_path(&key);
            if self.is_stale(&path, &old) {
                log::debug!("Evicting {key}");
                self.storage.delete(&p.current, &key).await?;
                evicted += 1;
            } else {
                kept += 1;
            }
        }

        let promoted = self.promote_staging().await?;
        self.save_manifest().await?;
        Ok(ActivationReport::Upgraded {
            kept,
            evicted,
            promoted,
        })
    }

    /// An entry is stale when its path left the table or its recorded hash
    /// changed between the old manifest and the new table.
    fn is_stale(&self, path: &str, old: &ResourceTable) -> bool {
        match self.resources.hash(path) {
            None => true,
            Some(new_hash) => old.hash(path) != Some(new_hash),
        }
    }

    /// Copies every staging entry into current, then drops staging.
    async fn promote_staging(&self) -> Result<usize> {
        let p = &self.partitions;
        let mut promoted = 0;
        for key in self.storage.keys(&p.staging).await? {
            if let Some(response) = self.storage.get(&p.staging, &key).await? {
                self.storage.put(&p.current, &key, &response).await?;
                promoted += 1;
            }
        }
        self.storage.delete_partition(&p.staging).await?;
        Ok(promoted)
    }

    async fn save_manifest(&self) -> Result<()> {
        let entry = Response::new(MANIFEST_KEY, 200, self.resources.to_json()?)
            .with_header("content-type", "application/json");
        self.storage
            .put(&self.partitions.manifest, MANIFEST_KEY, &entry)
            .await
    }

    // ------------------------------------------------------------------
    // Fetch
    // ------------------------------------------------------------------

    /// Decides how to answer an outgoing request.
    ///
    /// # Errors
    ///
    /// Returns the network error when a request cannot be answered from
    /// the network or the cache.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
        if request.method != Method::Get {
            return Ok(FetchOutcome::Passthrough);
        }
        let path = self.origin.request_path(&request.url);
        if !self.resources.contains(&path) {
            log::debug!("Not a versioned resource, passing through: {}", request.url);
            return Ok(FetchOutcome::Passthrough);
        }

        let response = if path == ROOT {
            self.online_first(request).await?
        } else {
            self.cache_first(request).await?
        };
        Ok(FetchOutcome::Respond(response))
    }

    async fn cache_first(&self, request: &Request) -> Result<Response> {
        let current = &self.partitions.current;
        if let Some(cached) = self.storage.get(current, request.cache_key()).await? {
            log::debug!("Cache hit: {}", request.url);
            return Ok(cached);
        }

        let response = self.fetcher.fetch(request).await?;
        if response.ok() {
            self.store_current(request, &response).await;
        }
        Ok(response)
    }

    async fn online_first(&self, request: &Request) -> Result<Response> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_current(request, &response).await;
                Ok(response)
            }
            Err(err) => {
                let cached = self
                    .storage
                    .get(&self.partitions.current, request.cache_key())
                    .await;
                match cached {
                    Ok(Some(response)) => {
                        log::warn!("Offline, serving cached {}: {err}", request.url);
                        Ok(response)
                    }
                    _ => Err(err),
                }
            }
        }
    }

    /// Stores a copy in current. Failures are logged; the caller still gets
    /// the live response.
    async fn store_current(&self, request: &Request, response: &Response) {
        if let Err(e) = self
            .storage
            .put(&self.partitions.current, request.cache_key(), response)
            .await
        {
            log::warn!("Failed to cache {}: {e}", request.url);
        }
    }

    // ------------------------------------------------------------------
    // Offline download
    // ------------------------------------------------------------------

    /// Fetches every table resource not yet in current and stores it there.
    ///
    /// All-or-nothing like install: nothing is written unless every missing
    /// resource was fetched with a 2xx status.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or storage failure.
    pub async fn download_offline(&self) -> Result<SyncStats> {
        let mut stats = SyncStatsBuilder::new();
        let current = &self.partitions.current;
        self.storage.open(current).await?;

        let present: HashSet<String> = self
            .storage
            .keys(current)
            .await?
            .iter()
            .map(|key| self.origin.key_path(key))
            .collect();
        let missing: Vec<String> = self
            .resources
            .paths()
            .filter(|path| !present.contains(*path))
            .map(|path| self.origin.resolve(path))
            .collect();
        stats.set_already_cached(self.resources.len() - missing.len());

        let fetched = self.fetch_all(missing, CacheMode::Default).await?;
        for (request, response) in fetched {
            self.storage
                .put(current, request.cache_key(), &response)
                .await?;
            stats.add_fetch(response.len());
        }

        let stats = stats.build();
        log::info!(
            "Offline download complete: {} fetched, {} already cached",
            stats.fetched,
            stats.already_cached
        );
        Ok(stats)
    }

    /// Fetches all URLs concurrently, failing if any fetch fails or returns
    /// a non-2xx status.
    async fn fetch_all(
        &self,
        urls: Vec<String>,
        cache: CacheMode,
    ) -> Result<Vec<(Request, Response)>> {
        let progress = self.progress.as_ref();
        progress.on_batch_start(urls.len());

        let results: Vec<Result<(Request, Response)>> = stream::iter(urls)
            .map(|url| async move {
                let request = Request::get(url).with_cache(cache);
                progress.on_fetch_start(&request.url);
                let result = self.fetcher.fetch(&request).await.and_then(|response| {
                    if response.ok() {
                        Ok(response)
                    } else {
                        Err(Error::BadStatus {
                            url: request.url.clone(),
                            status: response.status,
                        })
                    }
                });
                match result {
                    Ok(response) => {
                        progress.on_fetch_complete(&request.url, response.len());
                        Ok((request, response))
                    }
                    Err(e) => {
                        progress.on_error(&request.url, &e.to_string());
                        Err(e)
                    }
                }
            })
            .buffer_unordered(self.concurrent_fetches)
            .collect()
            .await;

        results.into_iter().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub(crate) const ORIGIN: &str = "https://game.example.com";

    /// Serves canned bodies per URL and records every request.
    #[derive(Default)]
    pub(crate) struct MockFetcher {
        bodies: Mutex<HashMap<String, (u16, String)>>,
        offline: Mutex<bool>,
        requests: Mutex<Vec<Request>>,
    }

    impl MockFetcher {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn serve(&self, path: &str, body: &str) {
            self.serve_status(path, 200, body);
        }

        pub(crate) fn serve_status(&self, path: &str, status: u16, body: &str) {
            let url = format!("{ORIGIN}/{}", path.trim_start_matches('/'));
            self.bodies
                .lock()
                .unwrap()
                .insert(url, (status, body.to_string()));
        }

        pub(crate) fn set_offline(&self, offline: bool) {
            *self.offline.lock().unwrap() = offline;
        }

        pub(crate) fn requests(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, request: &Request) -> Result<Response> {
            self.requests.lock().unwrap().push(request.clone());
            if *self.offline.lock().unwrap() {
                return Err(Error::Network("offline".to_string()));
            }
            let bodies = self.bodies.lock().unwrap();
            let url = request.cache_key();
            match bodies.get(url) {
                Some((status, body)) => Ok(Response::new(url, *status, body.clone())),
                None => Ok(Response::new(url, 404, "not found")),
            }
        }
    }

    pub(crate) fn manifest(resources: &[(&str, &str)], core: &[&str]) -> ResourceManifest {
        let table: ResourceTable = resources.iter().copied().collect();
        ResourceManifest::new(table, core.iter().copied()).unwrap()
    }

    fn url(path: &str) -> String {
        format!("{ORIGIN}/{}", path.trim_start_matches('/'))
    }

    type TestReconciler = CacheReconciler<Arc<MemoryStorage>, Arc<MockFetcher>>;

    fn reconciler(
        storage: &Arc<MemoryStorage>,
        fetcher: &Arc<MockFetcher>,
        manifest: ResourceManifest,
    ) -> TestReconciler {
        CacheReconciler::new(
            Arc::clone(storage),
            Arc::clone(fetcher),
            Origin::parse(ORIGIN).unwrap(),
            manifest,
        )
    }

    async fn current_keys(storage: &MemoryStorage) -> Vec<String> {
        storage
            .keys(&PartitionNames::default().current)
            .await
            .unwrap()
    }

    async fn current_body(storage: &MemoryStorage, path: &str) -> Option<String> {
        storage
            .get(&PartitionNames::default().current, &url(path))
            .await
            .unwrap()
            .map(|r| String::from_utf8(r.body.to_vec()).unwrap())
    }

    // =========================================================================
    // Install
    // =========================================================================

    #[tokio::test]
    async fn install_stages_core_with_reload() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        fetcher.serve("b.js", "B");
        let r = reconciler(
            &storage,
            &fetcher,
            manifest(&[("a.js", "h1"), ("b.js", "h2")], &["a.js"]),
        );

        let stats = r.install().await.unwrap();
        assert_eq!(stats.fetched, 1);
        assert_eq!(stats.total_bytes, 1);
        assert_eq!(
            storage.keys("flutter-temp-cache").await.unwrap(),
            vec![url("a.js")]
        );
        assert!(current_keys(&storage).await.is_empty());
        assert!(
            fetcher
                .requests()
                .iter()
                .all(|req| req.cache == CacheMode::Reload)
        );
    }

    #[tokio::test]
    async fn install_is_all_or_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        // b.js is not served: 404
        let r = reconciler(
            &storage,
            &fetcher,
            manifest(&[("a.js", "h1"), ("b.js", "h2")], &["a.js", "b.js"]),
        );

        let err = r.install().await.unwrap_err();
        assert!(matches!(err, Error::BadStatus { status: 404, .. }));
        assert!(storage.keys("flutter-temp-cache").await.unwrap().is_empty());
        assert!(!storage.has_partition("flutter-temp-cache").await.unwrap());
    }

    #[tokio::test]
    async fn failed_upgrade_install_leaves_active_version_alone() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");

        let v1 = manifest(&[("a.js", "h1")], &["a.js"]);
        let r1 = reconciler(&storage, &fetcher, v1.clone());
        r1.install().await.unwrap();
        r1.activate().await;

        // v2 adds b.js to the core set, but the server does not have it yet.
        let v2 = manifest(&[("a.js", "h2"), ("b.js", "h3")], &["a.js", "b.js"]);
        let r2 = reconciler(&storage, &fetcher, v2);
        assert!(r2.install().await.is_err());

        assert_eq!(
            storage.partitions().await.unwrap(),
            vec!["flutter-app-cache", "flutter-app-manifest"]
        );
        assert_eq!(current_keys(&storage).await, vec![url("a.js")]);
        let stored = storage
            .get("flutter-app-manifest", MANIFEST_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ResourceTable::from_json(&stored.body).unwrap(), v1.resources);
    }

    #[tokio::test]
    async fn install_fails_when_offline() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        fetcher.set_offline(true);
        let r = reconciler(&storage, &fetcher, manifest(&[("a.js", "h1")], &["a.js"]));

        assert!(matches!(r.install().await, Err(Error::Network(_))));
    }

    // =========================================================================
    // Activate
    // =========================================================================

    #[tokio::test]
    async fn first_activation_promotes_staging_and_saves_manifest() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        let m = manifest(&[("a.js", "h1"), ("b.js", "h2")], &["a.js"]);
        let r = reconciler(&storage, &fetcher, m.clone());

        // Junk left over from an unknown earlier version is wiped.
        storage
            .put("flutter-app-cache", &url("old.js"), &Response::new("", 200, "old"))
            .await
            .unwrap();

        r.install().await.unwrap();
        let report = r.activate().await;

        assert_eq!(report, ActivationReport::Fresh { promoted: 1 });
        assert!(report.claims_clients());
        assert_eq!(current_keys(&storage).await, vec![url("a.js")]);
        assert_eq!(current_body(&storage, "a.js").await.as_deref(), Some("A"));
        assert!(!storage.has_partition("flutter-temp-cache").await.unwrap());

        let stored = storage
            .get("flutter-app-manifest", MANIFEST_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ResourceTable::from_json(&stored.body).unwrap(), m.resources);
    }

    #[tokio::test]
    async fn upgrade_keeps_unchanged_and_evicts_changed() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        for path in ["a.js", "b.js", "c.js", "gone.js"] {
            fetcher.serve(path, path);
        }

        let v1 = manifest(
            &[("a.js", "h1"), ("b.js", "h2"), ("c.js", "h3"), ("gone.js", "h4")],
            &["a.js"],
        );
        let r1 = reconciler(&storage, &fetcher, v1);
        r1.install().await.unwrap();
        r1.activate().await;
        r1.download_offline().await.unwrap();
        assert_eq!(current_keys(&storage).await.len(), 4);

        // v2: b.js unchanged, c.js rehashed, gone.js removed.
        let v2 = manifest(&[("a.js", "h1"), ("b.js", "h2"), ("c.js", "h9")], &["a.js"]);
        let r2 = reconciler(&storage, &fetcher, v2);
        r2.install().await.unwrap();
        let report = r2.activate().await;

        assert_eq!(
            report,
            ActivationReport::Upgraded {
                kept: 2,
                evicted: 2,
                promoted: 1
            }
        );
        assert_eq!(current_keys(&storage).await, vec![url("a.js"), url("b.js")]);
    }

    #[tokio::test]
    async fn upgrade_evicts_versioned_query_keys() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        let m = manifest(&[("a.js", "h1")], &[]);
        let r = reconciler(&storage, &fetcher, m.clone());
        r.activate().await;

        storage
            .put("flutter-app-cache", &url("a.js?v=3"), &Response::new("", 200, "A"))
            .await
            .unwrap();
        let report = r.activate().await;
        assert!(matches!(report, ActivationReport::Upgraded { evicted: 1, .. }));
        assert!(current_keys(&storage).await.is_empty());
    }

    #[tokio::test]
    async fn two_deploy_scenario() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        fetcher.serve("b.js", "B");

        let r1 = reconciler(
            &storage,
            &fetcher,
            manifest(&[("a.js", "h1"), ("b.js", "h2")], &["a.js"]),
        );
        r1.install().await.unwrap();
        assert_eq!(r1.activate().await, ActivationReport::Fresh { promoted: 1 });
        assert_eq!(current_keys(&storage).await, vec![url("a.js")]);

        let r2 = reconciler(
            &storage,
            &fetcher,
            manifest(&[("a.js", "h1"), ("b.js", "h3")], &["a.js"]),
        );
        r2.install().await.unwrap();
        assert_eq!(
            r2.activate().await,
            ActivationReport::Upgraded {
                kept: 1,
                evicted: 0,
                promoted: 1
            }
        );
        assert_eq!(current_keys(&storage).await, vec![url("a.js")]);
    }

    #[tokio::test]
    async fn upgrade_keeps_unchanged_root_document() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("/", "<html></html>");
        fetcher.serve("main.js", "v1");

        let r1 = reconciler(
            &storage,
            &fetcher,
            manifest(&[("/", "h0"), ("main.js", "h1")], &[]),
        );
        r1.activate().await;
        r1.download_offline().await.unwrap();
        assert_eq!(current_keys(&storage).await, vec![url("/"), url("main.js")]);

        let r2 = reconciler(
            &storage,
            &fetcher,
            manifest(&[("/", "h0"), ("main.js", "h2")], &[]),
        );
        let report = r2.activate().await;

        assert_eq!(
            report,
            ActivationReport::Upgraded {
                kept: 1,
                evicted: 1,
                promoted: 0
            }
        );
        assert_eq!(current_keys(&storage).await, vec![format!("{ORIGIN}/")]);
    }

    #[tokio::test]
    async fn upgrade_evicts_paths_new_to_the_table() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        fetcher.serve("extra.js", "X");

        let r1 = reconciler(&storage, &fetcher, manifest(&[("a.js", "h1")], &[]));
        r1.activate().await;
        r1.download_offline().await.unwrap();
        // Cached outside the table, e.g. by an older worker.
        storage
            .put("flutter-app-cache", &url("extra.js"), &Response::new("", 200, "X"))
            .await
            .unwrap();

        let r2 = reconciler(
            &storage,
            &fetcher,
            manifest(&[("a.js", "h1"), ("extra.js", "h5")], &[]),
        );
        let report = r2.activate().await;

        assert_eq!(
            report,
            ActivationReport::Upgraded {
                kept: 1,
                evicted: 1,
                promoted: 0
            }
        );
        assert_eq!(current_keys(&storage).await, vec![url("a.js")]);
    }

    #[tokio::test]
    async fn activation_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        fetcher.serve("b.js", "B");
        let r = reconciler(
            &storage,
            &fetcher,
            manifest(&[("a.js", "h1"), ("b.js", "h2")], &["a.js"]),
        );
        r.install().await.unwrap();
        r.activate().await;
        r.download_offline().await.unwrap();
        let before = current_keys(&storage).await;

        let report = r.activate().await;
        assert_eq!(
            report,
            ActivationReport::Upgraded {
                kept: 2,
                evicted: 0,
                promoted: 0
            }
        );
        assert_eq!(current_keys(&storage).await, before);
    }

    #[tokio::test]
    async fn corrupt_manifest_clears_every_partition() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        let r = reconciler(&storage, &fetcher, manifest(&[("a.js", "h1")], &["a.js"]));

        storage
            .put("flutter-app-cache", &url("a.js"), &Response::new("", 200, "A"))
            .await
            .unwrap();
        storage
            .put("flutter-app-manifest", MANIFEST_KEY, &Response::new("", 200, "{not json"))
            .await
            .unwrap();
        r.install().await.unwrap();

        let report = r.activate().await;
        assert!(matches!(report, ActivationReport::Cleared { .. }));
        assert!(!report.claims_clients());
        assert!(storage.partitions().await.unwrap().is_empty());
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    async fn active_reconciler(
        storage: &Arc<MemoryStorage>,
        fetcher: &Arc<MockFetcher>,
    ) -> TestReconciler {
        fetcher.serve("/", "<html>v1</html>");
        fetcher.serve("main.js", "main");
        let r = reconciler(
            storage,
            fetcher,
            manifest(&[("/", "h0"), ("main.js", "h1")], &[]),
        );
        r.activate().await;
        r
    }

    #[tokio::test]
    async fn non_get_passes_through() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        let r = active_reconciler(&storage, &fetcher).await;

        let req = Request::new(Method::Post, url("main.js"));
        assert_eq!(r.handle_fetch(&req).await.unwrap(), FetchOutcome::Passthrough);
        assert_eq!(fetcher.request_count(), 0);
    }

    #[tokio::test]
    async fn unknown_path_passes_through_untouched() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        let r = active_reconciler(&storage, &fetcher).await;

        let req = Request::get(url("api/scores"));
        assert_eq!(r.handle_fetch(&req).await.unwrap(), FetchOutcome::Passthrough);
        assert_eq!(fetcher.request_count(), 0);
        assert!(current_keys(&storage).await.is_empty());
    }

    #[tokio::test]
    async fn cache_first_populates_then_serves_from_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        let r = active_reconciler(&storage, &fetcher).await;
        let req = Request::get(url("main.js"));

        let FetchOutcome::Respond(first) = r.handle_fetch(&req).await.unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(first.body.as_ref(), b"main");
        assert_eq!(fetcher.request_count(), 1);

        fetcher.set_offline(true);
        let FetchOutcome::Respond(second) = r.handle_fetch(&req).await.unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(second.body.as_ref(), b"main");
        assert_eq!(fetcher.request_count(), 1);
    }

    #[tokio::test]
    async fn cache_first_does_not_store_errors() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        let r = active_reconciler(&storage, &fetcher).await;
        fetcher.serve_status("main.js", 500, "boom");

        let outcome = r.handle_fetch(&Request::get(url("main.js"))).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Respond(ref resp) if resp.status == 500));
        assert!(current_keys(&storage).await.is_empty());
    }

    #[tokio::test]
    async fn cache_first_miss_offline_propagates() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        let r = active_reconciler(&storage, &fetcher).await;
        fetcher.set_offline(true);

        let err = r.handle_fetch(&Request::get(url("main.js"))).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn version_tag_is_intercepted_and_keyed_by_full_url() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        let r = active_reconciler(&storage, &fetcher).await;
        fetcher.serve("main.js?v=7", "tagged");

        let outcome = r.handle_fetch(&Request::get(url("main.js?v=7"))).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Respond(_)));
        assert_eq!(current_keys(&storage).await, vec![url("main.js?v=7")]);
    }

    #[tokio::test]
    async fn root_is_online_first() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        let r = active_reconciler(&storage, &fetcher).await;
        let req = Request::get(format!("{ORIGIN}/"));

        r.handle_fetch(&req).await.unwrap();
        fetcher.serve("/", "<html>v2</html>");
        let FetchOutcome::Respond(live) = r.handle_fetch(&req).await.unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(live.body.as_ref(), b"<html>v2</html>");
        assert_eq!(current_body(&storage, "/").await.as_deref(), Some("<html>v2</html>"));
        assert_eq!(fetcher.request_count(), 2);
    }

    #[tokio::test]
    async fn root_falls_back_to_cache_offline() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        let r = active_reconciler(&storage, &fetcher).await;

        r.handle_fetch(&Request::get(ORIGIN)).await.unwrap();
        fetcher.set_offline(true);

        let outcome = r
            .handle_fetch(&Request::get(format!("{ORIGIN}/#/level/3")))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            FetchOutcome::Respond(ref resp) if resp.body.as_ref() == b"<html>v1</html>"
        ));
    }

    #[tokio::test]
    async fn root_offline_without_cache_errors() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        let r = active_reconciler(&storage, &fetcher).await;
        fetcher.set_offline(true);

        assert!(r.handle_fetch(&Request::get(ORIGIN)).await.is_err());
    }

    // =========================================================================
    // Offline download
    // =========================================================================

    #[tokio::test]
    async fn download_offline_fills_missing_resources() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        let r = active_reconciler(&storage, &fetcher).await;
        r.handle_fetch(&Request::get(url("main.js"))).await.unwrap();
        let before = fetcher.request_count();

        let stats = r.download_offline().await.unwrap();
        assert_eq!(stats.fetched, 1);
        assert_eq!(stats.already_cached, 1);
        assert_eq!(fetcher.request_count(), before + 1);

        let keys = current_keys(&storage).await;
        for path in r.resources().paths() {
            assert!(keys.contains(&r.origin().resolve(path)), "missing {path}");
        }
    }

    #[tokio::test]
    async fn download_offline_is_all_or_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        let r = reconciler(
            &storage,
            &fetcher,
            manifest(&[("a.js", "h1"), ("missing.js", "h2")], &[]),
        );
        r.activate().await;

        assert!(r.download_offline().await.is_err());
        assert!(current_keys(&storage).await.is_empty());
    }

    #[tokio::test]
    async fn download_offline_reports_progress() {
        #[derive(Default)]
        struct Counting {
            batch: Mutex<usize>,
            done: Mutex<Vec<String>>,
        }
        impl SyncProgress for Counting {
            fn on_batch_start(&self, count: usize) {
                *self.batch.lock().unwrap() = count;
            }
            fn on_fetch_complete(&self, url: &str, _bytes: u64) {
                self.done.lock().unwrap().push(url.to_string());
            }
        }

        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.serve("a.js", "A");
        fetcher.serve("b.js", "B");
        let progress = Arc::new(Counting::default());
        let r = reconciler(
            &storage,
            &fetcher,
            manifest(&[("a.js", "h1"), ("b.js", "h2")], &[]),
        )
        .with_progress(progress.clone());

        r.download_offline().await.unwrap();
        assert_eq!(*progress.batch.lock().unwrap(), 2);
        assert_eq!(progress.done.lock().unwrap().len(), 2);
    }

    #[test]
    fn no_progress_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoProgress>();
    }
}
