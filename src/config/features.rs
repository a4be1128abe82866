//! Feature flags configuration

use serde::Deserialize;

/// Feature flags for enabling/disabling functionality
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FeatureFlags {
    /// Keep all state in process memory instead of PostgreSQL.
    /// Development and demos only; nothing survives a restart.
    pub in_memory_store: bool,

    /// Create unknown users on first use (in-memory store only)
    pub auto_provision_users: bool,
}
