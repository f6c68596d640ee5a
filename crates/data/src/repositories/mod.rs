//! Repository implementations for database persistence.
//!
//! This module provides repository patterns for storing and retrieving
//! pending swaps, trade history, positions and strategy returns.

mod columns;
mod pending_repository;
mod position_repository;
mod return_repository;
mod trade_repository;

pub use pending_repository::{PendingRecord, PendingRepository};
pub use position_repository::{ClosedPositionRecord, PositionRecord, PositionRepository};
pub use return_repository::{ReturnRecord, ReturnRepository};
pub use trade_repository::{FailureRecord, TradeRecord, TradeRepository};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

/// Database connection wrapper for repositories.
#[derive(Clone)]
pub struct Database {
    pool: Arc<PgPool>,
}

impl Database {
    /// Creates a new Database wrapper from a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Opens a pool of at most `max_connections` to `database_url`.
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates a PendingRepository instance.
    #[must_use]
    pub fn pending(&self) -> PendingRepository {
        PendingRepository::new(self.pool.clone())
    }

    /// Creates a TradeRepository instance.
    #[must_use]
    pub fn trades(&self) -> TradeRepository {
        TradeRepository::new(self.pool.clone())
    }

    /// Creates a PositionRepository instance.
    #[must_use]
    pub fn positions(&self) -> PositionRepository {
        PositionRepository::new(self.pool.clone())
    }

    /// Creates a ReturnRepository instance.
    #[must_use]
    pub fn returns(&self) -> ReturnRepository {
        ReturnRepository::new(self.pool.clone())
    }

    /// Round-trips a trivial query.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
        Ok(())
    }

    /// Runs database migrations.
    ///
    /// # Errors
    /// Returns an error if migrations fail.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(include_str!("../../migrations/001_initial_schema.sql"))
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}
