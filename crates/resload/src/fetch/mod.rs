//! Fetcher capability.
//!
//! The engine never talks to the network itself; it asks a [`Fetcher`] for
//! bytes, optionally carrying the freshness token of the cached copy.

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::CacheEntry;
use crate::error::LoadResult;
use crate::key::ResourceKey;
use crate::meta::ResourceMeta;

mod http;

pub use http::HttpFetcher;

/// Outcome of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The origin confirmed the token sent with the request.
    NotModified,
    /// The origin supplied a full payload.
    Fetched(Fetched),
}

/// A full payload from the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub data: Bytes,
    /// New freshness token, if the origin supplied one.
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

impl Fetched {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            etag: None,
            content_type: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub(crate) fn into_entry(self) -> CacheEntry {
        CacheEntry::new(self.data, ResourceMeta::new(self.etag, self.content_type))
    }
}

/// Transport capability used by the loader.
///
/// Timeouts and retries are the fetcher's business. A `freshness_token`
/// must be sent to the origin exactly as given.
#[async_trait]
pub trait Fetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(
        &self,
        key: &ResourceKey,
        freshness_token: Option<&str>,
    ) -> LoadResult<FetchOutcome>;
}
