use std::time::Duration;

use mongodb::{Client, Database, bson::doc};
use tokio::time::timeout;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};

/// Upper bound for the handshake ping; the storage supervisor owns retries.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a client for `config` and make sure the database answers one ping.
pub async fn open_database(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    match timeout(HANDSHAKE_TIMEOUT, database.run_command(doc! { "ping": 1 })).await {
        Ok(Ok(_)) => Ok((client, database)),
        Ok(Err(source)) => Err(MongoDaoError::Handshake {
            database: config.database_name.clone(),
            source,
        }),
        Err(_) => Err(MongoDaoError::HandshakeTimeout {
            database: config.database_name.clone(),
            after: HANDSHAKE_TIMEOUT,
        }),
    }
}
