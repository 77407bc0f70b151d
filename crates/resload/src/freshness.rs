//! Freshness validation.
//!
//! A cached entry moves through:
//!
//! ```text
//! Unchecked ──conditional fetch──┬─> ServerConfirmedFresh  (serve cached bytes)
//!                                ├─> ServerSuppliedNew     (store + serve new bytes)
//!                                └─> ValidationFailed      (stale fallback or fail)
//! ```
//!
//! An entry without a freshness token degrades to an unconditional fetch
//! every time it is validated. A "not modified" answer to such a fetch is
//! an invalid response and is handled like any other failed validation.

use tracing::{debug, warn};

use crate::cache::CacheEntry;
use crate::error::{LoadError, LoadResult};
use crate::fetch::{FetchOutcome, Fetched, Fetcher};
use crate::key::ResourceKey;

/// What to do with a cache lookup result before any network traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshnessPlan {
    /// Serve the cached entry as-is.
    ServeCached,
    /// Ask the origin whether the cached entry is still current.
    Revalidate { token: Option<String> },
    /// Nothing cached; fetch unconditionally.
    FullFetch,
}

/// Decide how to treat a cache lookup.
pub fn plan(cached: Option<&CacheEntry>, check_with_server: bool) -> FreshnessPlan {
    match cached {
        None => FreshnessPlan::FullFetch,
        Some(_) if !check_with_server => FreshnessPlan::ServeCached,
        Some(entry) => FreshnessPlan::Revalidate {
            token: entry.meta.freshness_token().map(String::from),
        },
    }
}

/// Terminal state of one validation.
#[derive(Debug)]
pub enum Validation {
    ServerConfirmedFresh,
    ServerSuppliedNew(Fetched),
    ValidationFailed(LoadError),
}

/// Where the bytes delivered to subscribers came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Cached bytes, confirmed or assumed fresh. Nothing to store.
    Cached(CacheEntry),
    /// New bytes from the origin. Must be stored before delivery.
    Fetched(CacheEntry),
    /// Cached bytes served because the origin could not be reached.
    Stale(CacheEntry),
}

/// Issue the conditional fetch for a cached entry.
pub async fn revalidate(
    fetcher: &dyn Fetcher,
    key: &ResourceKey,
    token: Option<&str>,
) -> Validation {
    if token.is_none() {
        debug!(key = %key, "no freshness token recorded, fetching unconditionally");
    }

    match fetcher.fetch(key, token).await {
        // Nothing was offered for the origin to confirm.
        Ok(FetchOutcome::NotModified) if token.is_none() => {
            Validation::ValidationFailed(not_modified_without_token())
        }
        Ok(FetchOutcome::NotModified) => Validation::ServerConfirmedFresh,
        Ok(FetchOutcome::Fetched(fetched)) => Validation::ServerSuppliedNew(fetched),
        Err(e) => Validation::ValidationFailed(e),
    }
}

/// Error for a "not modified" answer to a request that carried no token.
pub(crate) fn not_modified_without_token() -> LoadError {
    LoadError::InvalidResponse {
        message: "not modified without a freshness token".to_string(),
    }
}

impl Validation {
    /// Collapse the validation into the bytes to deliver.
    pub fn resolve(
        self,
        key: &ResourceKey,
        cached: CacheEntry,
        fallback_to_stale: bool,
    ) -> LoadResult<Resolution> {
        match self {
            Self::ServerConfirmedFresh => {
                debug!(key = %key, "origin confirmed cached entry");
                Ok(Resolution::Cached(cached))
            }
            Self::ServerSuppliedNew(fetched) => {
                debug!(key = %key, etag = ?fetched.etag, "origin supplied a new representation");
                Ok(Resolution::Fetched(fetched.into_entry()))
            }
            Self::ValidationFailed(e) if fallback_to_stale => {
                warn!(key = %key, error = %e, "revalidation failed, serving stale entry");
                Ok(Resolution::Stale(cached))
            }
            Self::ValidationFailed(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ResourceMeta;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct ScriptedFetcher {
        outcome: Mutex<Option<LoadResult<FetchOutcome>>>,
        seen_token: Mutex<Option<Option<String>>>,
    }

    impl ScriptedFetcher {
        fn new(outcome: LoadResult<FetchOutcome>) -> Self {
            Self {
                outcome: Mutex::new(Some(outcome)),
                seen_token: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            _key: &ResourceKey,
            freshness_token: Option<&str>,
        ) -> LoadResult<FetchOutcome> {
            *self.seen_token.lock().unwrap() = Some(freshness_token.map(String::from));
            self.outcome.lock().unwrap().take().expect("fetched twice")
        }
    }

    fn key() -> ResourceKey {
        ResourceKey::parse("img1").unwrap()
    }

    fn cached(etag: Option<&str>) -> CacheEntry {
        CacheEntry::new(
            Bytes::from_static(b"old"),
            ResourceMeta::new(etag.map(String::from), None),
        )
    }

    #[test]
    fn test_plan() {
        assert_eq!(plan(None, true), FreshnessPlan::FullFetch);
        assert_eq!(plan(Some(&cached(Some("\"t\""))), false), FreshnessPlan::ServeCached);
        assert_eq!(
            plan(Some(&cached(Some("\"t\""))), true),
            FreshnessPlan::Revalidate {
                token: Some("\"t\"".to_string())
            }
        );
        assert_eq!(
            plan(Some(&cached(None)), true),
            FreshnessPlan::Revalidate { token: None }
        );
    }

    #[tokio::test]
    async fn test_not_modified_serves_cached() {
        let fetcher = ScriptedFetcher::new(Ok(FetchOutcome::NotModified));
        let validation = revalidate(&fetcher, &key(), Some("\"t\"")).await;

        assert_eq!(
            *fetcher.seen_token.lock().unwrap(),
            Some(Some("\"t\"".to_string()))
        );
        let resolution = validation.resolve(&key(), cached(Some("\"t\"")), false).unwrap();
        assert_eq!(resolution, Resolution::Cached(cached(Some("\"t\""))));
    }

    #[tokio::test]
    async fn test_new_payload_replaces_entry() {
        let fetcher = ScriptedFetcher::new(Ok(FetchOutcome::Fetched(
            Fetched::new(Bytes::from_static(b"new")).with_etag("\"t2\""),
        )));
        let validation = revalidate(&fetcher, &key(), Some("\"t\"")).await;

        match validation.resolve(&key(), cached(Some("\"t\"")), true).unwrap() {
            Resolution::Fetched(entry) => {
                assert_eq!(&entry.data[..], b"new");
                assert_eq!(entry.meta.etag.as_deref(), Some("\"t2\""));
            }
            other => panic!("expected Fetched, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_with_and_without_fallback() {
        let failing = || {
            ScriptedFetcher::new(Err(LoadError::Network {
                message: "offline".into(),
            }))
        };

        let validation = revalidate(&failing(), &key(), Some("\"t\"")).await;
        let resolution = validation.resolve(&key(), cached(Some("\"t\"")), true).unwrap();
        assert!(matches!(resolution, Resolution::Stale(_)));

        let validation = revalidate(&failing(), &key(), Some("\"t\"")).await;
        let err = validation
            .resolve(&key(), cached(Some("\"t\"")), false)
            .unwrap_err();
        assert!(!err.is_cancelled());
        assert!(matches!(err, LoadError::Network { .. }));
    }

    #[tokio::test]
    async fn test_not_modified_without_token_is_invalid() {
        let validation = revalidate(
            &ScriptedFetcher::new(Ok(FetchOutcome::NotModified)),
            &key(),
            None,
        )
        .await;
        let err = validation.resolve(&key(), cached(None), false).unwrap_err();
        assert!(matches!(err, LoadError::InvalidResponse { .. }));
        assert!(!err.is_cancelled());

        let validation = revalidate(
            &ScriptedFetcher::new(Ok(FetchOutcome::NotModified)),
            &key(),
            None,
        )
        .await;
        let resolution = validation.resolve(&key(), cached(None), true).unwrap();
        assert!(matches!(resolution, Resolution::Stale(_)));
    }

    #[tokio::test]
    async fn test_missing_token_fetches_unconditionally() {
        let fetcher = ScriptedFetcher::new(Ok(FetchOutcome::Fetched(Fetched::new(
            Bytes::from_static(b"full"),
        ))));
        let _ = revalidate(&fetcher, &key(), None).await;
        assert_eq!(*fetcher.seen_token.lock().unwrap(), Some(None));
    }
}
