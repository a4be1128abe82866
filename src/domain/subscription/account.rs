//! The slice of the user account this service reads and keeps in sync.

use serde::{Deserialize, Serialize};

use super::status::UserSubscriptionStatus;
use crate::domain::foundation::{Timestamp, UserId};

/// User account fields relevant to entitlements.
///
/// `subscription_status` and `premium_access_until` are a cache of the
/// subscription record; `trial_used` is owned here and only ever flips
/// from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub email: Option<String>,
    pub subscription_status: UserSubscriptionStatus,
    pub premium_access_until: Option<Timestamp>,
    pub trial_used: bool,
    pub gateway_customer_id: Option<String>,
}

impl UserAccount {
    /// A fresh account on the free tier.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            email: None,
            subscription_status: UserSubscriptionStatus::Free,
            premium_access_until: None,
            trial_used: false,
            gateway_customer_id: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Cache write that accompanies every subscription record write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCacheUpdate {
    pub subscription_status: UserSubscriptionStatus,
    pub premium_access_until: Option<Timestamp>,
    /// Flip `trial_used`; the store must refuse if it is already set.
    pub claim_trial: bool,
}

impl AccessCacheUpdate {
    /// Applies the cache fields. The caller checks `claim_trial` first.
    pub fn apply_to(&self, user: &mut UserAccount) {
        user.subscription_status = self.subscription_status;
        user.premium_access_until = self.premium_access_until;
        if self.claim_trial {
            user.trial_used = true;
        }
    }
}
