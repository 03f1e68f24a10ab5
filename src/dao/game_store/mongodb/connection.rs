use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};

use super::error::{MongoDaoError, MongoResult};
use crate::services::retry::{self, Failure, RetryPolicy};

const PING_POLICY: RetryPolicy = RetryPolicy {
    max_attempts: 10,
    base_delay: Duration::from_millis(250),
    max_delay: Duration::from_secs(5),
    backoff_factor: 2.0,
};

/// Build a client and wait until the server answers a ping.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut attempts = 0;
    retry::execute(&PING_POLICY, || {
        attempts += 1;
        let attempt = attempts;
        let database = database.clone();
        async move {
            database
                .run_command(doc! { "ping": 1 })
                .await
                .map(|_| ())
                .map_err(|source| {
                    let err = MongoDaoError::InitialPing {
                        attempts: attempt,
                        source,
                    };
                    if err.storage_kind().is_transient() {
                        Failure::Transient(err)
                    } else {
                        Failure::Abort(err)
                    }
                })
        }
    })
    .await?;

    Ok((client, database))
}
