/// CouchDB backend.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// In-memory backend.
pub mod memory;
/// MongoDB backend.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};

use crate::dao::{
    keys,
    storage::{StorageError, StorageResult},
};

/// Abstraction over the durable key-value collaborator.
///
/// Values are opaque strings; callers that store structured data go through
/// [`get_json`] and [`put_json`].
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    fn put(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Read a JSON value stored under `key`.
pub async fn get_json<T>(store: &dyn KvStore, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Malformed {
                key: key.to_owned(),
                source,
            }),
        None => Ok(None),
    }
}

/// Serialize `value` to JSON and store it under `key`.
pub async fn put_json<T>(store: &dyn KvStore, key: &str, value: &T) -> StorageResult<()>
where
    T: ?Sized + Serialize,
{
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Malformed {
        key: key.to_owned(),
        source,
    })?;
    store.put(key, raw).await
}

/// Session-local storage: the shared store seen through a per-session key prefix.
#[derive(Clone)]
pub struct SessionStorage {
    store: Arc<dyn KvStore>,
    scope: String,
}

impl SessionStorage {
    /// View of `store` scoped to `session_key`.
    pub fn new(store: Arc<dyn KvStore>, session_key: &str) -> Self {
        Self {
            store,
            scope: keys::session_scope(session_key),
        }
    }

    /// Read and decode the session-local value `name`.
    pub async fn get_json<T>(&self, name: &str) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        get_json(self.store.as_ref(), &self.key(name)).await
    }

    /// Encode and write the session-local value `name`.
    pub async fn put_json<T>(&self, name: &str, value: &T) -> StorageResult<()>
    where
        T: ?Sized + Serialize,
    {
        put_json(self.store.as_ref(), &self.key(name), value).await
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.scope, name)
    }
}
