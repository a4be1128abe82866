//! Stitchbook - subscription and premium-access backend
//!
//! Owns the one-time free trial, paid plan purchases through the payment
//! gateway, cancellation, gateway webhooks and the premium access check
//! every content request goes through.

pub mod adapters;
pub mod app;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
