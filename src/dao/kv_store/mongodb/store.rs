use std::sync::Arc;

use futures::future::BoxFuture;
use mongodb::{Client, Collection, Database, bson::doc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::open_database,
    error::{MongoDaoError, MongoResult},
};
use crate::dao::{kv_store::KvStore, storage::StorageResult};

const KV_COLLECTION_NAME: &str = "kv";

/// One key-value record; `_id` carries the key so lookups hit the primary index.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoValueDocument {
    #[serde(rename = "_id")]
    key: String,
    value: String,
}

/// Key-value store backed by a MongoDB collection.
#[derive(Clone)]
pub struct MongoKvStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    // Held so the connection pool lives as long as the database handle.
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = open_database(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoKvStore {
    /// Establish a connection to MongoDB.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = open_database(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        Ok(Self { inner })
    }

    async fn collection(&self) -> Collection<MongoValueDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoValueDocument>(KV_COLLECTION_NAME)
    }

    async fn get_value(&self, key: &str) -> MongoResult<Option<String>> {
        let document = self
            .collection()
            .await
            .find_one(doc! { "_id": key })
            .await
            .map_err(|source| MongoDaoError::Get {
                key: key.to_owned(),
                source,
            })?;
        Ok(document.map(|doc| doc.value))
    }

    async fn put_value(&self, key: &str, value: String) -> MongoResult<()> {
        let document = MongoValueDocument {
            key: key.to_owned(),
            value,
        };
        self.collection()
            .await
            .replace_one(doc! { "_id": key }, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Put {
                key: key.to_owned(),
                source,
            })?;
        Ok(())
    }
}

impl KvStore for MongoKvStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.get_value(&key).await.map_err(Into::into) })
    }

    fn put(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.put_value(&key, value).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
