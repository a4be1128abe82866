//! SubscriptionRepository port - persistence of entitlement records.
//!
//! Every write carries the matching user access cache so that record and
//! cache change together or not at all.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, UserId};
use crate::domain::subscription::{AccessCacheUpdate, Subscription};

/// Repository for entitlement records.
///
/// Error codes implementations must use:
/// - `SubscriptionExists` when inserting a second record for a user
/// - `TrialAlreadyUsed` when `claim_trial` is set and the account's flag is already true
/// - `ConcurrentModification` when updating a record whose version has moved on
/// - `UserNotFound` when the owning account does not exist
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<Subscription>, DomainError>;

    async fn find_by_gateway_subscription_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Inserts a new record and writes the user cache in one transaction.
    async fn insert(
        &self,
        subscription: &Subscription,
        cache: AccessCacheUpdate,
    ) -> Result<(), DomainError>;

    /// Replaces a record loaded at `subscription.version()` and writes the
    /// user cache in one transaction. The stored version is incremented.
    async fn update(
        &self,
        subscription: &Subscription,
        cache: AccessCacheUpdate,
    ) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_repository_is_object_safe() {
        fn _accepts_dyn(_repo: &dyn SubscriptionRepository) {}
    }
}
