//! Load coordinator.
//!
//! Every `load` for a key attaches a subscriber to that key's pending load,
//! starting one if none exists. The pending load drives one cache lookup,
//! at most one network round-trip and one transform run per distinct
//! transform, then dispatches an outcome to each subscriber still attached.
//! The load stays pending, and cancellable, until that dispatch.
//!
//! ```text
//! load ──> PendingTable ──(first subscriber)──> drive
//!                                               ├─ cache.get
//!                                               ├─ freshness plan
//!                                               ├─ fetch (bounded by limiter)
//!                                               ├─ cache.put
//!                                               ├─ transforms
//!                                               └─ finish + dispatch
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use bytes::Bytes;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::cache::{CacheBackend, CacheEntry, CacheStats, MemoryCache, PersistentCache};
use crate::config::{ConcurrencyLimit, HttpConfig, LoaderConfig};
use crate::error::{LoadError, LoadResult};
use crate::fetch::{FetchOutcome, Fetcher, HttpFetcher};
use crate::freshness::{self, FreshnessPlan, Resolution};
use crate::key::ResourceKey;
use crate::transform::Transform;

mod dispatch;
mod handle;
mod pending;

pub use handle::{CancelHandle, LoadTicket};

use dispatch::Outputs;
use pending::{Attach, PendingTable, Subscriber};

static SHARED: OnceLock<Loader> = OnceLock::new();

/// Resource loader.
///
/// Cloning is cheap; clones share the pending table, cache and limiter.
/// Independently built loaders share nothing.
#[derive(Debug, Clone)]
pub struct Loader {
    inner: Arc<Inner>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    config: LoaderConfig,
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn CacheBackend>,
    pending: Mutex<PendingTable>,
    limiter: Option<Arc<Semaphore>>,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_subscriber(&self, key: &ResourceKey, id: u64) {
        let detached = self.pending().detach(key, id);
        if let Some(subscriber) = detached {
            debug!(key = %key, subscriber = id, "subscription cancelled");
            subscriber.cancel();
        }
    }

    /// Wait for a fetch slot. FIFO: the semaphore queues waiters in order.
    async fn fetch_permit(&self) -> Option<OwnedSemaphorePermit> {
        let limiter = self.limiter.as_ref()?;
        Arc::clone(limiter).acquire_owned().await.ok()
    }

    async fn fetch_full(&self, key: &ResourceKey) -> LoadResult<CacheEntry> {
        let _permit = self.fetch_permit().await;
        match self.fetcher.fetch(key, None).await? {
            FetchOutcome::Fetched(fetched) => Ok(fetched.into_entry()),
            FetchOutcome::NotModified => Err(freshness::not_modified_without_token()),
        }
    }

    async fn resolve(&self, key: &ResourceKey) -> LoadResult<Resolution> {
        let cached = match self.cache.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "cache lookup failed, treating as miss");
                None
            }
        };

        let check = self.config.should_check_freshness_with_server;
        match (freshness::plan(cached.as_ref(), check), cached) {
            (FreshnessPlan::ServeCached, Some(entry)) => {
                debug!(key = %key, "cache hit");
                Ok(Resolution::Cached(entry))
            }
            (FreshnessPlan::Revalidate { token }, Some(entry)) => {
                let _permit = self.fetch_permit().await;
                freshness::revalidate(self.fetcher.as_ref(), key, token.as_deref())
                    .await
                    .resolve(key, entry, self.config.should_fallback_to_stale_on_error)
            }
            _ => {
                debug!(key = %key, "cache miss");
                self.fetch_full(key).await.map(Resolution::Fetched)
            }
        }
    }

    async fn store(&self, key: &ResourceKey, entry: &CacheEntry) {
        if let Err(e) = self.cache.put(key, entry.clone()).await {
            warn!(key = %key, error = %e, "failed to cache fetched resource");
        }
    }
}

/// Drive one pending load to completion and dispatch its outcome.
async fn drive(inner: Arc<Inner>, key: ResourceKey) {
    let data: LoadResult<Bytes> = match inner.resolve(&key).await {
        Ok(Resolution::Fetched(entry)) => {
            inner.store(&key, &entry).await;
            info!(key = %key, size = entry.size, etag = ?entry.meta.etag, "fetched resource");
            Ok(entry.data)
        }
        Ok(Resolution::Cached(entry)) | Ok(Resolution::Stale(entry)) => Ok(entry.data),
        Err(e) => {
            warn!(key = %key, error = %e, "load failed");
            Err(e)
        }
    };

    // The load stays registered until every transform has settled, so it
    // can still be cancelled and late subscribers still join it.
    let mut outputs = Outputs::new(key.clone(), data);
    loop {
        let missing = {
            let mut table = inner.pending();
            let Some(pending) = table.get(&key) else {
                return;
            };
            let missing = outputs.missing(pending.subscribers());
            if missing.is_empty() {
                let Some(pending) = table.finish(&key) else {
                    return;
                };
                debug!(
                    key = %key,
                    subscribers = pending.subscriber_count(),
                    elapsed_ms = pending.started().elapsed().as_millis() as u64,
                    "load finished"
                );
                outputs.deliver(pending.into_subscribers());
                return;
            }
            missing
        };
        outputs.compute(missing).await;
    }
}

impl Loader {
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::default()
    }

    /// Memory-only loader over the given fetcher.
    pub fn new(config: LoaderConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let cache = Arc::new(MemoryCache::with_policy(
            config.max_in_memory_cache_capacity,
            config.eviction_policy,
        ));
        Self::with_parts(config, fetcher, cache)
    }

    pub fn with_parts(
        config: LoaderConfig,
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn CacheBackend>,
    ) -> Self {
        let limiter = match config.max_concurrent_requests {
            ConcurrencyLimit::Automatic => None,
            ConcurrencyLimit::Limited(n) => Some(Arc::new(Semaphore::new(n))),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                cache,
                pending: Mutex::new(PendingTable::default()),
                limiter,
            }),
        }
    }

    /// Process-wide loader, built on first use from the environment.
    ///
    /// Uses [`HttpFetcher`] and a persistent cache when
    /// `RESLOAD_PERSIST_TO_DISK` is set, memory-only otherwise.
    pub fn shared() -> &'static Loader {
        SHARED.get_or_init(|| {
            let config = LoaderConfig::from_env();
            let fetcher = HttpFetcher::from_env().unwrap_or_else(|e| {
                warn!(error = %e, "failed to build configured HTTP client, using defaults");
                HttpFetcher::with_client(reqwest::Client::new(), HttpConfig::default())
            });
            let cache = default_cache(&config);
            Self::with_parts(config, Arc::new(fetcher), cache)
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Load a resource.
    ///
    /// Returns immediately. The ticket resolves to exactly one outcome: the
    /// transformed object (raw [`Bytes`] without a transform) or an error.
    /// Requires a Tokio runtime; without one the ticket fails with
    /// [`LoadError::Config`].
    pub fn load(&self, resource: &str, transform: Option<Transform>) -> LoadTicket {
        match ResourceKey::parse(resource) {
            Ok(key) => self.load_key(key, transform),
            Err(e) => failed_ticket(e),
        }
    }

    pub fn load_key(&self, key: ResourceKey, transform: Option<Transform>) -> LoadTicket {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                return failed_ticket(LoadError::Config {
                    message: format!("load requires a Tokio runtime: {}", e),
                })
            }
        };

        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let (id, attach) = {
            let mut table = self.inner.pending();
            let id = table.next_id();
            let subscriber = Subscriber::new(id, transform, cancelled.clone(), tx);
            (id, table.attach(&key, subscriber))
        };

        match attach {
            Attach::Started => {
                debug!(key = %key, subscriber = id, "starting load");
                runtime.spawn(drive(Arc::clone(&self.inner), key.clone()));
            }
            Attach::Coalesced => {
                debug!(key = %key, subscriber = id, "coalesced onto pending load");
            }
        }

        let handle = CancelHandle::new(key, id, cancelled, Arc::downgrade(&self.inner));
        LoadTicket::new(handle, rx)
    }

    /// Whether a load for `resource` is in flight.
    pub fn is_loading(&self, resource: &str) -> bool {
        match ResourceKey::parse(resource) {
            Ok(key) => self.inner.pending().contains(&key),
            Err(_) => false,
        }
    }

    /// Cancel every subscription waiting on `resource`.
    ///
    /// The fetch itself keeps running and still populates the cache.
    pub fn cancel(&self, resource: &str) {
        let Ok(key) = ResourceKey::parse(resource) else {
            return;
        };
        let detached = self.inner.pending().detach_all(&key);
        if !detached.is_empty() {
            debug!(key = %key, subscribers = detached.len(), "load cancelled");
        }
        for subscriber in detached {
            subscriber.cancel();
        }
    }

    /// Cancel one subscription only.
    pub fn cancel_subscription(&self, handle: &CancelHandle) {
        handle.cancel();
    }

    pub async fn is_in_cache(&self, resource: &str) -> bool {
        match ResourceKey::parse(resource) {
            Ok(key) => self.inner.cache.contains(&key).await,
            Err(_) => false,
        }
    }

    /// Cached bytes for `resource`, without network traffic or transforms.
    pub async fn cached_object(&self, resource: &str) -> LoadResult<Option<Bytes>> {
        let key = ResourceKey::parse(resource)?;
        Ok(self.inner.cache.get(&key).await?.map(|entry| entry.data))
    }

    /// Cached entry including metadata.
    pub async fn cached_entry(&self, resource: &str) -> LoadResult<Option<CacheEntry>> {
        let key = ResourceKey::parse(resource)?;
        self.inner.cache.get(&key).await
    }

    pub async fn remove_from_cache(&self, resource: &str) -> LoadResult<()> {
        let key = ResourceKey::parse(resource)?;
        self.inner.cache.remove(&key).await
    }

    /// Empty both cache tiers. Pending loads are unaffected.
    pub async fn clear_cache(&self) -> LoadResult<()> {
        self.inner.cache.clear().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }
}

fn failed_ticket(error: LoadError) -> LoadTicket {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(Err(error));
    LoadTicket::new(CancelHandle::detached(Arc::new(AtomicBool::new(false))), rx)
}

fn default_cache(config: &LoaderConfig) -> Arc<dyn CacheBackend> {
    if config.should_persist_to_disk {
        match PersistentCache::from_config(config) {
            Ok(cache) => return Arc::new(cache),
            Err(e) => warn!(error = %e, "disk cache unavailable, using memory only"),
        }
    }
    Arc::new(MemoryCache::with_policy(
        config.max_in_memory_cache_capacity,
        config.eviction_policy,
    ))
}

/// Builder for [`Loader`].
#[derive(Debug, Default)]
pub struct LoaderBuilder {
    config: Option<LoaderConfig>,
    fetcher: Option<Arc<dyn Fetcher>>,
    cache: Option<Arc<dyn CacheBackend>>,
}

impl LoaderBuilder {
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Cache backend. Defaults to a persistent cache when the config asks for
    /// disk persistence, memory-only otherwise.
    pub fn cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the loader. Without a fetcher, an [`HttpFetcher`] configured from
    /// the environment is used.
    pub fn build(self) -> LoadResult<Loader> {
        let config = self.config.unwrap_or_default();
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::from_env()?),
        };
        let cache = match self.cache {
            Some(cache) => cache,
            None if config.should_persist_to_disk => Arc::new(PersistentCache::from_config(&config)?),
            None => Arc::new(MemoryCache::with_policy(
                config.max_in_memory_cache_capacity,
                config.eviction_policy,
            )),
        };
        Ok(Loader::with_parts(config, fetcher, cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Fetched;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, _key: &ResourceKey, _token: Option<&str>) -> LoadResult<FetchOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchOutcome::Fetched(Fetched::new(Bytes::from_static(b"payload"))))
        }
    }

    fn loader() -> (Loader, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher::default());
        (Loader::new(LoaderConfig::default(), fetcher.clone()), fetcher)
    }

    #[tokio::test]
    async fn test_invalid_key_fails_asynchronously() {
        let (loader, fetcher) = loader();
        let ticket = loader.load("   ", None);
        assert!(ticket.cancel_handle().key().is_none());

        let err = ticket.await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidKey { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_load_without_runtime_fails() {
        let (loader, _) = loader();
        let ticket = loader.load("img1", None);
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = rt.block_on(ticket.wait()).unwrap_err();
        assert!(matches!(err, LoadError::Config { .. }));
    }

    #[tokio::test]
    async fn test_second_load_is_served_from_cache() {
        let (loader, fetcher) = loader();
        loader.load("img1", None).await.unwrap();
        let object = loader.load("img1", None).await.unwrap();

        assert_eq!(&object.downcast::<Bytes>().unwrap()[..], b"payload");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.cache_stats().entries, 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_key_is_noop() {
        let (loader, _) = loader();
        loader.cancel("nothing-here");
        loader.cancel("");
        assert!(!loader.is_loading("nothing-here"));
    }

    #[tokio::test]
    async fn test_handle_cancel_after_delivery_is_noop() {
        let (loader, _) = loader();
        let ticket = loader.load("img1", None);
        let handle = ticket.cancel_handle();
        assert!(ticket.await.is_ok());

        loader.cancel_subscription(&handle);
        assert!(handle.is_cancelled());
        assert!(!loader.is_loading("img1"));
    }

    #[tokio::test]
    async fn test_builder_defaults_to_memory_cache() {
        let loader = Loader::builder()
            .fetcher(Arc::new(CountingFetcher::default()))
            .build()
            .unwrap();
        assert_eq!(
            loader.cache_stats().capacity,
            LoaderConfig::default().max_in_memory_cache_capacity
        );
        assert!(!loader.config().should_persist_to_disk);
    }
}
