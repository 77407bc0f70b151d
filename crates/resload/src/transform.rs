//! Transform pipeline.
//!
//! Transforms turn raw bytes into caller-usable objects. They run on the
//! blocking pool, never on the task that completed the fetch, and each
//! subscriber's transform is independent of its siblings'.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{LoadError, LoadResult};
use crate::key::ResourceKey;

/// Type-erased result of a load.
///
/// Loads without a transform yield the raw [`Bytes`].
#[derive(Clone)]
pub struct LoadedObject(Arc<dyn Any + Send + Sync>);

impl LoadedObject {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        self.0.is::<T>()
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Shared handle to the object, if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    /// Whether both handles point at the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for LoadedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedObject").finish_non_exhaustive()
    }
}

type TransformFn = dyn Fn(&[u8]) -> Result<LoadedObject, String> + Send + Sync;

/// A background processor from raw bytes to an object.
///
/// Clones share identity: subscribers holding clones of one transform share
/// a single run per completed load.
#[derive(Clone)]
pub struct Transform {
    name: Arc<str>,
    func: Arc<TransformFn>,
}

impl Transform {
    pub fn new<T, E, F>(name: &str, func: F) -> Self
    where
        T: Any + Send + Sync,
        E: fmt::Display,
        F: Fn(&[u8]) -> Result<T, E> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(move |data: &[u8]| {
                func(data).map(LoadedObject::new).map_err(|e| e.to_string())
            }),
        }
    }

    /// Decode the bytes as UTF-8 text (`String`).
    pub fn utf8() -> Self {
        Self::new("utf8", |data: &[u8]| String::from_utf8(data.to_vec()))
    }

    /// Parse the bytes as JSON into `T`.
    pub fn json<T>() -> Self
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        Self::new(std::any::type_name::<T>(), |data: &[u8]| {
            serde_json::from_slice::<T>(data)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `other` is a clone of this transform.
    pub fn same_as(&self, other: &Transform) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }

    /// Run synchronously on the current thread.
    pub fn apply(&self, key: &ResourceKey, data: &[u8]) -> LoadResult<LoadedObject> {
        (self.func)(data).map_err(|message| LoadError::Transform {
            key: key.to_string(),
            message,
        })
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Produce the object for one distinct transform (or none).
///
/// Transforms run on the blocking pool; a panicking transform is reported as
/// a transform failure.
pub(crate) async fn run(
    transform: Option<Transform>,
    key: &ResourceKey,
    data: Bytes,
) -> LoadResult<LoadedObject> {
    let Some(transform) = transform else {
        return Ok(LoadedObject::new(data));
    };

    debug!(key = %key, transform = transform.name(), "running transform");
    let task_key = key.clone();
    let name = transform.name.clone();
    match tokio::task::spawn_blocking(move || transform.apply(&task_key, &data)).await {
        Ok(result) => result,
        Err(e) => Err(LoadError::Transform {
            key: key.to_string(),
            message: format!("transform {} aborted: {}", name, e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn key() -> ResourceKey {
        ResourceKey::parse("res").unwrap()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Manifest {
        name: String,
        size: u32,
    }

    #[tokio::test]
    async fn test_no_transform_yields_raw_bytes() {
        let object = run(None, &key(), Bytes::from_static(&[0xFF, 0xD8]))
            .await
            .unwrap();
        let bytes = object.downcast::<Bytes>().unwrap();
        assert_eq!(&bytes[..], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_utf8_transform() {
        let object = run(Some(Transform::utf8()), &key(), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(object.downcast_ref::<String>().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_json_transform() {
        let object = run(
            Some(Transform::json::<Manifest>()),
            &key(),
            Bytes::from_static(br#"{"name":"logo","size":42}"#),
        )
        .await
        .unwrap();
        assert_eq!(
            *object.downcast::<Manifest>().unwrap(),
            Manifest {
                name: "logo".into(),
                size: 42
            }
        );
    }

    #[tokio::test]
    async fn test_rejection_is_transform_error() {
        let err = run(Some(Transform::utf8()), &key(), Bytes::from_static(&[0xFF, 0xFE]))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Transform { .. }));
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn test_panicking_transform_is_contained() {
        let exploding = Transform::new("explode", |_: &[u8]| -> Result<(), String> {
            panic!("decoder bug")
        });
        let err = run(Some(exploding), &key(), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Transform { .. }));
    }

    #[test]
    fn test_identity_follows_clones() {
        let a = Transform::utf8();
        let b = a.clone();
        let c = Transform::utf8();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
