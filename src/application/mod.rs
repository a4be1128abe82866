//! Application layer - Commands, Queries, and Handlers.
//!
//! Handlers coordinate the subscription domain with storage and the payment
//! gateway through ports. Commands change entitlement state; queries read it.

pub mod handlers;
