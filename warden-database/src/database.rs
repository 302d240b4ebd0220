use std::future::Future;
use std::pin::Pin;

use sqlx::{PgPool, Postgres, Transaction, migrate::Migrator};
use tracing::warn;

use crate::cache::CacheService;

/// Compile-time discovered SQLx migrations for the `warden-database` crate.
pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Future returned by a [`Database::with_transaction`] body.
pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 't>>;

/// Shared database handle passed across crates.
#[derive(Clone, Debug)]
pub struct Database {
    pool: PgPool,
    cache: CacheService,
}

impl Database {
    /// Create a database handle from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: CacheService::in_memory("warden:prod"),
        }
    }

    /// Create a database handle from an existing pool and cache service.
    pub fn with_cache(pool: PgPool, cache: CacheService) -> Self {
        Self { pool, cache }
    }

    /// Expose the underlying pool for query modules.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Expose the cache service for query modules.
    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    /// Run `body` inside one transaction: commit when it returns `Ok`, roll back
    /// when it returns `Err`. A dropped future rolls back as the transaction drops.
    pub async fn with_transaction<T, F>(&self, body: F) -> anyhow::Result<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> TxFuture<'t, T>,
    {
        let mut tx = self.pool.begin().await?;

        match body(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(source) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(?rollback, "transaction rollback failed");
                }
                Err(source)
            }
        }
    }
}
