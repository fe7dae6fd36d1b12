use std::time::Duration;

use mongodb::error::Error as MongoError;
use thiserror::Error;

/// Result alias of the MongoDB backend.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures of the MongoDB backend.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// Required environment variable is missing.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// The connection string cannot be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// The driver rejected the client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// The database did not answer the first ping.
    #[error("MongoDB database `{database}` did not answer the handshake ping")]
    Handshake {
        database: String,
        #[source]
        source: MongoError,
    },
    /// The first ping did not complete in time.
    #[error("MongoDB database `{database}` handshake timed out after {after:?}")]
    HandshakeTimeout { database: String, after: Duration },
    /// A periodic ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// Reading a key failed.
    #[error("failed to read key `{key}`")]
    Get {
        key: String,
        #[source]
        source: MongoError,
    },
    /// Writing a key failed.
    #[error("failed to write key `{key}`")]
    Put {
        key: String,
        #[source]
        source: MongoError,
    },
}
