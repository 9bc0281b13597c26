use std::sync::Arc;

use anyhow::Context;
use sqlx::MySqlPool;
use tracing::{info, warn};

use crate::store::{LedgerStore, MemoryStore, MySqlStore};

const MEMORY_URL: &str = "memory://";

/// `memory://` runs without a database; anything else is a MySQL URL.
pub async fn init_store(database_url: &str) -> anyhow::Result<Arc<dyn LedgerStore>> {
    if database_url == MEMORY_URL {
        warn!("Using the in-memory store, nothing survives a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = MySqlPool::connect(database_url)
        .await
        .context("Failed to connect to database")?;
    let store = MySqlStore::new(pool);
    store.migrate().await.context("Failed to run migrations")?;
    info!("Database connected and migrated");
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn memory_url_needs_no_database() {
        let store = init_store(MEMORY_URL).await.unwrap();
        assert!(store.location(1).await.unwrap().is_none());
    }
}
