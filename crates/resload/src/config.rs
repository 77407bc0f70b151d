//! Engine configuration.
//!
//! [`LoaderConfig::default`] holds the process-wide defaults. Every loader
//! instance carries its own copy, so overrides never leak between instances.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Upper bound on simultaneously running fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyLimit {
    /// Leave the bound to the async runtime.
    Automatic,
    /// At most this many fetches in flight; the rest queue in FIFO order.
    Limited(usize),
}

impl ConcurrencyLimit {
    /// `0` means automatic.
    pub fn from_count(count: usize) -> Self {
        if count == 0 {
            Self::Automatic
        } else {
            Self::Limited(count)
        }
    }
}

/// Maximum aggregate size of the in-memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCapacity {
    Unlimited,
    Bytes(u64),
}

impl CacheCapacity {
    /// `0` means unlimited.
    pub fn from_bytes(bytes: u64) -> Self {
        if bytes == 0 {
            Self::Unlimited
        } else {
            Self::Bytes(bytes)
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::Unlimited => None,
            Self::Bytes(n) => Some(*n),
        }
    }
}

/// Order in which the memory tier gives up entries when over capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently stored or read goes first.
    #[default]
    Lru,
    /// Oldest stored goes first; reads do not refresh position.
    Fifo,
}

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Maximum concurrent fetches.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: ConcurrencyLimit,

    /// Memory tier capacity.
    #[serde(default = "default_memory_capacity")]
    pub max_in_memory_cache_capacity: CacheCapacity,

    /// Write fetched resources through to the disk tier.
    #[serde(default)]
    pub should_persist_to_disk: bool,

    /// Revalidate cache hits with a conditional fetch.
    #[serde(default)]
    pub should_check_freshness_with_server: bool,

    /// Serve stale cached bytes when a fetch fails.
    #[serde(default = "default_true")]
    pub should_fallback_to_stale_on_error: bool,

    /// Memory tier eviction order.
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,

    /// Disk tier location (defaults to the user cache directory).
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_max_concurrent_requests() -> ConcurrencyLimit {
    ConcurrencyLimit::Automatic
}

fn default_memory_capacity() -> CacheCapacity {
    CacheCapacity::Bytes(50 * 1024 * 1024)
}

fn default_true() -> bool {
    true
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            max_in_memory_cache_capacity: default_memory_capacity(),
            should_persist_to_disk: false,
            should_check_freshness_with_server: false,
            should_fallback_to_stale_on_error: default_true(),
            eviction_policy: EvictionPolicy::default(),
            cache_dir: None,
        }
    }
}

impl LoaderConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `RESLOAD_MAX_CONCURRENT_REQUESTS` | Fetch bound (`0` or `auto` = automatic) |
    /// | `RESLOAD_MEMORY_CAPACITY` | Memory tier bytes (`0` or `unlimited`) |
    /// | `RESLOAD_PERSIST_TO_DISK` | Enable the disk tier |
    /// | `RESLOAD_CHECK_FRESHNESS` | Revalidate cache hits |
    /// | `RESLOAD_STALE_ON_ERROR` | Serve stale bytes on fetch failure |
    /// | `RESLOAD_CACHE_DIR` | Disk tier directory |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_requests: std::env::var("RESLOAD_MAX_CONCURRENT_REQUESTS")
                .ok()
                .and_then(|v| {
                    if v.eq_ignore_ascii_case("auto") {
                        Some(ConcurrencyLimit::Automatic)
                    } else {
                        v.parse().ok().map(ConcurrencyLimit::from_count)
                    }
                })
                .unwrap_or(defaults.max_concurrent_requests),
            max_in_memory_cache_capacity: std::env::var("RESLOAD_MEMORY_CAPACITY")
                .ok()
                .and_then(|v| {
                    if v.eq_ignore_ascii_case("unlimited") {
                        Some(CacheCapacity::Unlimited)
                    } else {
                        v.parse().ok().map(CacheCapacity::from_bytes)
                    }
                })
                .unwrap_or(defaults.max_in_memory_cache_capacity),
            should_persist_to_disk: env_flag("RESLOAD_PERSIST_TO_DISK")
                .unwrap_or(defaults.should_persist_to_disk),
            should_check_freshness_with_server: env_flag("RESLOAD_CHECK_FRESHNESS")
                .unwrap_or(defaults.should_check_freshness_with_server),
            should_fallback_to_stale_on_error: env_flag("RESLOAD_STALE_ON_ERROR")
                .unwrap_or(defaults.should_fallback_to_stale_on_error),
            eviction_policy: defaults.eviction_policy,
            cache_dir: std::env::var("RESLOAD_CACHE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_max_concurrent_requests(mut self, limit: ConcurrencyLimit) -> Self {
        self.max_concurrent_requests = limit;
        self
    }

    pub fn with_memory_capacity(mut self, capacity: CacheCapacity) -> Self {
        self.max_in_memory_cache_capacity = capacity;
        self
    }

    pub fn with_persist_to_disk(mut self, persist: bool) -> Self {
        self.should_persist_to_disk = persist;
        self
    }

    pub fn with_check_freshness(mut self, check: bool) -> Self {
        self.should_check_freshness_with_server = check;
        self
    }

    pub fn with_stale_fallback(mut self, fallback: bool) -> Self {
        self.should_fallback_to_stale_on_error = fallback;
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}

/// HTTP fetcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            token: None,
        }
    }
}

impl HttpConfig {
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `RESLOAD_HTTP_TIMEOUT` | Request timeout in seconds (default: 30) |
    /// | `RESLOAD_HTTP_MAX_RETRIES` | Max retries for transient failures (default: 3) |
    /// | `RESLOAD_HTTP_TOKEN` | Bearer token |
    pub fn from_env() -> Self {
        Self {
            timeout_secs: std::env::var("RESLOAD_HTTP_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
            max_retries: std::env::var("RESLOAD_HTTP_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_retries),
            token: std::env::var("RESLOAD_HTTP_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "RESLOAD_MAX_CONCURRENT_REQUESTS",
        "RESLOAD_MEMORY_CAPACITY",
        "RESLOAD_PERSIST_TO_DISK",
        "RESLOAD_CHECK_FRESHNESS",
        "RESLOAD_STALE_ON_ERROR",
        "RESLOAD_CACHE_DIR",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        assert_eq!(LoaderConfig::from_env(), LoaderConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("RESLOAD_MAX_CONCURRENT_REQUESTS", "4");
        std::env::set_var("RESLOAD_MEMORY_CAPACITY", "unlimited");
        std::env::set_var("RESLOAD_PERSIST_TO_DISK", "1");
        std::env::set_var("RESLOAD_CHECK_FRESHNESS", "true");
        std::env::set_var("RESLOAD_STALE_ON_ERROR", "0");
        std::env::set_var("RESLOAD_CACHE_DIR", "/tmp/resload-test");

        let config = LoaderConfig::from_env();
        clear_env();

        assert_eq!(config.max_concurrent_requests, ConcurrencyLimit::Limited(4));
        assert_eq!(config.max_in_memory_cache_capacity, CacheCapacity::Unlimited);
        assert!(config.should_persist_to_disk);
        assert!(config.should_check_freshness_with_server);
        assert!(!config.should_fallback_to_stale_on_error);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/resload-test")));
    }

    #[test]
    #[serial]
    fn test_zero_means_automatic_and_unlimited() {
        clear_env();
        std::env::set_var("RESLOAD_MAX_CONCURRENT_REQUESTS", "0");
        std::env::set_var("RESLOAD_MEMORY_CAPACITY", "0");

        let config = LoaderConfig::from_env();
        clear_env();

        assert_eq!(config.max_concurrent_requests, ConcurrencyLimit::Automatic);
        assert_eq!(config.max_in_memory_cache_capacity.limit(), None);
    }

    #[test]
    fn test_builder() {
        let config = LoaderConfig::default()
            .with_max_concurrent_requests(ConcurrencyLimit::Limited(2))
            .with_memory_capacity(CacheCapacity::Bytes(1024))
            .with_check_freshness(true)
            .with_stale_fallback(false)
            .with_eviction_policy(EvictionPolicy::Fifo);

        assert_eq!(config.max_concurrent_requests, ConcurrencyLimit::Limited(2));
        assert_eq!(config.max_in_memory_cache_capacity.limit(), Some(1024));
        assert!(config.should_check_freshness_with_server);
        assert!(!config.should_fallback_to_stale_on_error);
        assert_eq!(config.eviction_policy, EvictionPolicy::Fifo);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{"max_concurrent_requests":{"limited":3}}"#).unwrap();
        assert_eq!(config.max_concurrent_requests, ConcurrencyLimit::Limited(3));
        assert!(config.should_fallback_to_stale_on_error);
        assert_eq!(config.eviction_policy, EvictionPolicy::Lru);
    }
}
