//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, time, errors, state machine)
//! - `subscription` - Entitlement records, trials and premium access

pub mod foundation;
pub mod subscription;
