//! In-memory storage adapters.

mod account_store;

pub use account_store::InMemoryAccountStore;
