//! Durable key/value blob storage for the disk tier.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{LoadError, LoadResult};
use crate::key::ResourceKey;

const DATA_FILE: &str = "data.bin";
const META_FILE: &str = "meta.bin";
const RECORD_FILE: &str = "record.json";

/// Byte storage keyed by resource key.
///
/// Metadata bytes are opaque to the store and returned unchanged.
#[async_trait]
pub trait BlobStore: Send + Sync + std::fmt::Debug {
    async fn write(&self, key: &ResourceKey, data: &[u8], meta: &[u8]) -> LoadResult<()>;

    /// Returns `(data, meta)`, or `None` if absent or unreadable as a whole.
    async fn read(&self, key: &ResourceKey) -> LoadResult<Option<(Bytes, Vec<u8>)>>;

    async fn exists(&self, key: &ResourceKey) -> bool;

    async fn delete(&self, key: &ResourceKey) -> LoadResult<()>;

    async fn delete_all(&self) -> LoadResult<()>;
}

/// Integrity record written after data and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobRecord {
    key: String,
    size: u64,
    /// sha256:<hex> of the data file.
    digest: String,
    stored_at: DateTime<Utc>,
}

/// Blob store backed by a directory tree.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Store under the default location (`{user cache dir}/resload/blobs`).
    pub fn new() -> LoadResult<Self> {
        Ok(Self::with_dir(default_cache_dir()?))
    }

    pub fn with_dir(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &ResourceKey) -> PathBuf {
        let name = key.storage_name();
        self.root.join(&name[..2]).join(name)
    }

    async fn discard(&self, key: &ResourceKey, reason: &str) {
        warn!(key = %key, reason, "discarding unreadable disk cache entry");
        if let Err(e) = self.delete(key).await {
            warn!(key = %key, error = %e, "failed to discard disk cache entry");
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, key: &ResourceKey, data: &[u8], meta: &[u8]) -> LoadResult<()> {
        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| LoadError::cache(format!("failed to create cache directory: {}", e)))?;

        // Drop the old record first so a torn overwrite reads as a miss.
        remove_if_exists(&dir.join(RECORD_FILE)).await?;

        write_atomic(&dir.join(DATA_FILE), data).await?;
        write_atomic(&dir.join(META_FILE), meta).await?;

        let record = BlobRecord {
            key: key.to_string(),
            size: data.len() as u64,
            digest: sha256_digest(data),
            stored_at: Utc::now(),
        };
        let record_json = serde_json::to_vec_pretty(&record)
            .map_err(|e| LoadError::cache(format!("failed to serialize record: {}", e)))?;
        write_atomic(&dir.join(RECORD_FILE), &record_json).await?;

        debug!(key = %key, size = record.size, "wrote disk cache entry");
        Ok(())
    }

    async fn read(&self, key: &ResourceKey) -> LoadResult<Option<(Bytes, Vec<u8>)>> {
        let dir = self.entry_dir(key);

        let record_bytes = match fs::read(dir.join(RECORD_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LoadError::cache(format!(
                    "failed to read cache record: {}",
                    e
                )))
            }
        };

        let record: BlobRecord = match serde_json::from_slice(&record_bytes) {
            Ok(record) => record,
            Err(_) => {
                self.discard(key, "corrupt record").await;
                return Ok(None);
            }
        };

        if record.key != key.as_str() {
            self.discard(key, "key collision").await;
            return Ok(None);
        }

        let (data, meta) = match (
            fs::read(dir.join(DATA_FILE)).await,
            fs::read(dir.join(META_FILE)).await,
        ) {
            (Ok(data), Ok(meta)) => (data, meta),
            (Err(e), _) | (_, Err(e)) if e.kind() == ErrorKind::NotFound => {
                self.discard(key, "missing file").await;
                return Ok(None);
            }
            (Err(e), _) | (_, Err(e)) => {
                return Err(LoadError::cache(format!(
                    "failed to read cached resource: {}",
                    e
                )))
            }
        };

        let actual = sha256_digest(&data);
        if actual != record.digest {
            warn!(
                key = %key,
                expected = %record.digest,
                actual = %actual,
                "disk cache integrity check failed"
            );
            self.discard(key, "digest mismatch").await;
            return Ok(None);
        }

        Ok(Some((Bytes::from(data), meta)))
    }

    async fn exists(&self, key: &ResourceKey) -> bool {
        fs::try_exists(self.entry_dir(key).join(RECORD_FILE))
            .await
            .unwrap_or(false)
    }

    async fn delete(&self, key: &ResourceKey) -> LoadResult<()> {
        let dir = self.entry_dir(key);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(key = %key, "removed disk cache entry");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LoadError::cache(format!(
                "failed to remove cache entry: {}",
                e
            ))),
        }
    }

    /// Remove every shard directory. Anything else under the root is left alone.
    async fn delete_all(&self) -> LoadResult<()> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(LoadError::cache(format!("failed to list cache: {}", e))),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LoadError::cache(format!("failed to list cache: {}", e)))?
        {
            if !is_shard_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(LoadError::cache(format!("failed to clear cache: {}", e))),
            }
        }

        debug!(root = %self.root.display(), shards = removed, "cleared disk cache");
        Ok(())
    }
}

pub(crate) fn default_cache_dir() -> LoadResult<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| LoadError::cache("could not determine cache directory"))?;

    Ok(base.join("resload").join("blobs"))
}

async fn write_atomic(path: &Path, content: &[u8]) -> LoadResult<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .await
        .map_err(|e| LoadError::cache(format!("failed to write temp file: {}", e)))?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| LoadError::cache(format!("failed to rename temp file: {}", e)))?;

    Ok(())
}

async fn remove_if_exists(path: &Path) -> LoadResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LoadError::cache(format!(
            "failed to remove stale record: {}",
            e
        ))),
    }
}

fn is_shard_name(name: &str) -> bool {
    name.len() == 2
        && name
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}
