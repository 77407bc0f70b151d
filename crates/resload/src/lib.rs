//! Resource loading engine.
//!
//! Given a resource identifier (usually a URL), this crate returns the
//! resource's processed representation, deciding transparently between the
//! in-memory cache, the disk cache and the network:
//!
//! - Request coalescing: concurrent loads of one key share a single fetch
//! - Two-tier cache (memory + disk) with a capacity-bounded memory tier
//! - ETag revalidation with optional stale fallback on failure
//! - Per-subscription and per-key cancellation
//! - Background transforms from raw bytes to caller objects
//!
//! # Quick Start
//!
//! ```no_run
//! use resload::{Loader, Transform};
//!
//! # async fn example() -> resload::LoadResult<()> {
//! let loader = Loader::shared();
//!
//! let text = loader
//!     .load("https://example.com/notes.txt", Some(Transform::utf8()))
//!     .await?;
//! println!("{}", text.downcast_ref::<String>().map(String::as_str).unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `RESLOAD_MAX_CONCURRENT_REQUESTS` | Fetch bound (default: automatic) |
//! | `RESLOAD_MEMORY_CAPACITY` | Memory tier bytes (default: 50 MiB) |
//! | `RESLOAD_PERSIST_TO_DISK` | Write fetched resources to disk (default: off) |
//! | `RESLOAD_CHECK_FRESHNESS` | Revalidate cache hits with the origin (default: off) |
//! | `RESLOAD_STALE_ON_ERROR` | Serve stale bytes when a fetch fails (default: on) |
//! | `RESLOAD_CACHE_DIR` | Disk tier directory (default: user cache dir) |
//! | `RESLOAD_HTTP_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `RESLOAD_HTTP_MAX_RETRIES` | Max retries for transient failures (default: 3) |
//! | `RESLOAD_HTTP_TOKEN` | Bearer token sent with every request |

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod freshness;
pub mod key;
pub mod loader;
pub mod meta;
pub mod transform;

// Re-export main types
pub use cache::{
    BlobStore, CacheBackend, CacheEntry, CacheStats, FsBlobStore, MemoryCache, PersistentCache,
};
pub use config::{CacheCapacity, ConcurrencyLimit, EvictionPolicy, HttpConfig, LoaderConfig};
pub use error::{LoadError, LoadResult};
pub use fetch::{FetchOutcome, Fetched, Fetcher, HttpFetcher};
pub use freshness::{FreshnessPlan, Resolution, Validation};
pub use key::ResourceKey;
pub use loader::{CancelHandle, LoadTicket, Loader, LoaderBuilder};
pub use meta::ResourceMeta;
pub use transform::{LoadedObject, Transform};
