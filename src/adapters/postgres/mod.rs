//! PostgreSQL adapters - database implementations of the storage ports.
//!
//! - `PostgresAccountStore` - subscriptions, user access cache and the
//!   webhook ledger, sharing one pool

mod account_store;

pub use account_store::PostgresAccountStore;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
