/// Connection settings.
pub mod config;
mod connection;
mod error;
mod models;
/// `GameStore` implementation.
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoGameStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        let kind = err.storage_kind();
        StorageError::with_source(kind, err.to_string(), err)
    }
}
