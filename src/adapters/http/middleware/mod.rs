//! HTTP middleware for axum.
//!
//! - `auth` - Authenticated-user extractor
//! - `premium_gate` - Blocking and advisory access gate for premium content

pub mod auth;
pub mod premium_gate;

pub use auth::{AuthenticatedUser, AuthenticationRequired, USER_ID_HEADER};
pub use premium_gate::{premium_gate, PremiumAccess, PremiumGate};
