use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

const IN_MEMORY_PREFIX: &str = "mem://";

const INDEX_DEFINITIONS: &[&str] = &[
    "DEFINE INDEX IF NOT EXISTS idx_document_created ON document FIELDS created_at",
    "DEFINE INDEX IF NOT EXISTS idx_document_state ON document FIELDS state",
    "DEFINE INDEX IF NOT EXISTS idx_chat_record_document ON chat_record FIELDS document_id",
];

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// # Initialize a new database client
    ///
    /// In-memory addresses (`mem://`) have no users to sign in as, so the root signin
    /// only happens against remote engines.
    ///
    /// # Returns
    /// * `SurrealDbClient` initialized
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if !address.starts_with(IN_MEMORY_PREFIX) {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.build_indexes().await?;
        Ok(())
    }

    /// Defines the lookup indexes used by document listing and chat history.
    pub async fn build_indexes(&self) -> Result<(), Error> {
        for definition in INDEX_DEFINITIONS {
            self.client.query(*definition).await?.check()?;
        }
        Ok(())
    }

    /// Creates `item` under its own id; fails if a record with that id already exists.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect(IN_MEMORY_PREFIX).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
