use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::dao::{kv_store::KvStore, storage::StorageResult};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
};

/// Attempts made when CouchDB reports a revision conflict on write.
const MAX_CONFLICT_RETRIES: usize = 3;

/// One key-value record; the document id is the key itself.
#[derive(Debug, Serialize, Deserialize)]
struct CouchValueDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    value: String,
}

/// Key-value store backed by a CouchDB database.
#[derive(Clone)]
pub struct CouchKvStore {
    client: Client,
    database_url: Arc<Url>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchKvStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let mut database_url =
            Url::parse(&config.base_url).map_err(|_| CouchDaoError::InvalidUrl {
                url: config.base_url.clone(),
            })?;
        database_url
            .path_segments_mut()
            .map_err(|_| CouchDaoError::InvalidUrl {
                url: config.base_url.clone(),
            })?
            .pop_if_empty()
            .push(&config.database);

        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            database_url: Arc::new(database_url),
            database: Arc::<str>::from(config.database),
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn document_request(&self, method: Method, key: &str) -> reqwest::RequestBuilder {
        let mut url = Url::clone(&self.database_url);
        // The database URL was validated as a base URL in `connect`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(key);
        }
        self.authorized(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = Url::clone(&self.database_url);

        let response = self
            .authorized(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorized(self.client.put(url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn check_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let response = self
            .authorized(self.client.get(Url::clone(&self.database_url)))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::DatabaseStatus {
                database,
                status: response.status(),
            })
        }
    }

    async fn get_document(&self, key: &str) -> CouchResult<Option<CouchValueDocument>> {
        let response = self
            .document_request(Method::GET, key)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                key: key.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchValueDocument>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    key: key.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                key: key.to_string(),
                status: other,
            }),
        }
    }

    async fn put_value(&self, key: &str, value: String) -> CouchResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let rev = self.get_document(key).await?.and_then(|doc| doc.rev);
            let document = CouchValueDocument {
                id: key.to_owned(),
                rev,
                value: value.clone(),
            };

            let response = self
                .document_request(Method::PUT, key)
                .json(&document)
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    key: key.to_string(),
                    source,
                })?;

            match response.status() {
                status if status.is_success() => return Ok(()),
                StatusCode::CONFLICT if attempt < MAX_CONFLICT_RETRIES => continue,
                status => {
                    return Err(CouchDaoError::RequestStatus {
                        key: key.to_string(),
                        status,
                    });
                }
            }
        }
    }
}

impl KvStore for CouchKvStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            store
                .get_document(&key)
                .await
                .map(|document| document.map(|doc| doc.value))
                .map_err(Into::into)
        })
    }

    fn put(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.put_value(&key, value).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check_database().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
