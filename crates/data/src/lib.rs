//! Postgres persistence for the trading engine.
//!
//! Provides:
//! - Repositories over the tables in `migrations/`
//! - [`PgTradeStore`], the durable implementation of the storage port

pub mod repositories;
pub mod store;

pub use repositories::Database;
pub use store::PgTradeStore;
