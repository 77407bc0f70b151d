//! Metadata stored alongside cached bytes.
//!
//! Cache backends persist this verbatim and never look inside it. The
//! coordinator reads only the freshness token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata recorded for a fetched resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Freshness token (entity tag) for conditional requests.
    #[serde(default)]
    pub etag: Option<String>,

    /// Content type reported by the origin.
    #[serde(default)]
    pub content_type: Option<String>,

    /// When the bytes were fetched.
    pub fetched_at: DateTime<Utc>,
}

impl ResourceMeta {
    pub fn new(etag: Option<String>, content_type: Option<String>) -> Self {
        Self {
            etag,
            content_type,
            fetched_at: Utc::now(),
        }
    }

    /// The token to send with a conditional fetch, if the origin supplied one.
    pub fn freshness_token(&self) -> Option<&str> {
        self.etag.as_deref().filter(|t| !t.is_empty())
    }
}
