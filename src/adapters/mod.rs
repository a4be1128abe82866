//! Adapters - Implementations of port interfaces.
//!
//! - `http` - axum routes, DTOs and middleware
//! - `memory` - in-process stores for tests and development
//! - `postgres` - sqlx-backed stores
//! - `square` - Square payment gateway client and webhook verifier

pub mod http;
pub mod memory;
pub mod postgres;
pub mod square;
