//! MongoDB client wrapper

use bson::doc;
use mongodb::{Client, Collection, Database};
use tracing::info;

use crate::types::IndexerError;

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the server responds
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, IndexerError> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| IndexerError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| IndexerError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Handle to the configured database
    pub fn database(&self) -> Database {
        self.client.database(&self.db_name)
    }

    /// Typed collection handle
    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.database().collection::<T>(name)
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}
