//! Resource key derivation.
//!
//! A key is the normalized identity of a resource. Absolute URLs are
//! normalized by the `url` crate (lowercased scheme and host, default port
//! elided, fragment dropped); anything else is used as-is after trimming.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{LoadError, LoadResult};

/// Normalized identity of a loadable resource.
///
/// Two loads with equal keys share cache entries and in-flight fetches,
/// regardless of their transforms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Derive a key from a resource identifier (typically a URL).
    pub fn parse(identifier: &str) -> LoadResult<Self> {
        let trimmed = identifier.trim();
        if trimmed.is_empty() {
            return Err(LoadError::InvalidKey {
                identifier: identifier.to_string(),
                reason: "identifier is empty".to_string(),
            });
        }

        match Url::parse(trimmed) {
            Ok(mut url) if !url.cannot_be_a_base() => {
                url.set_fragment(None);
                Ok(Self(url.to_string()))
            }
            _ => Ok(Self(trimmed.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe name derived from the key (lowercase hex SHA-256).
    pub fn storage_name(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_normalization() {
        let a = ResourceKey::parse("HTTPS://Example.COM:443/img/1.png#top").unwrap();
        let b = ResourceKey::parse("https://example.com/img/1.png").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://example.com/img/1.png");
    }

    #[test]
    fn test_query_is_part_of_identity() {
        let a = ResourceKey::parse("https://example.com/a?size=1").unwrap();
        let b = ResourceKey::parse("https://example.com/a?size=2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_opaque_identifier_is_trimmed() {
        let key = ResourceKey::parse("  img1 ").unwrap();
        assert_eq!(key.as_str(), "img1");
    }

    #[test]
    fn test_empty_identifier_rejected() {
        let err = ResourceKey::parse("   ").unwrap_err();
        assert!(matches!(err, LoadError::InvalidKey { .. }));
    }

    #[test]
    fn test_storage_name_shape() {
        let name = ResourceKey::parse("img1").unwrap().storage_name();
        assert_eq!(name.len(), 64);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
