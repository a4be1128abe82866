//! Premium access decisions made from the user's cached fields.
//!
//! These functions never touch storage. Expiry is evaluated against the
//! `now` passed in, so a stale `premium_access_until` in the past denies
//! access without any background sweep.

use std::borrow::Cow;

use serde::Serialize;

use super::account::UserAccount;
use super::status::UserSubscriptionStatus;
use crate::domain::foundation::Timestamp;

/// Result of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessInfo {
    pub has_premium_access: bool,
    pub status: UserSubscriptionStatus,
    pub premium_access_until: Option<Timestamp>,
}

/// Evaluates the cached pair. Mirrors `EntitlementState::has_premium_access`
/// for the pair produced by `EntitlementState::user_cache`.
pub fn cache_grants_access(
    status: UserSubscriptionStatus,
    premium_access_until: Option<Timestamp>,
    now: Timestamp,
) -> bool {
    match status {
        UserSubscriptionStatus::Free => false,
        UserSubscriptionStatus::PremiumMonthly | UserSubscriptionStatus::PremiumYearly => {
            premium_access_until.map_or(true, |until| now < until)
        }
        UserSubscriptionStatus::Trial | UserSubscriptionStatus::Cancelled => {
            premium_access_until.map_or(false, |until| now < until)
        }
    }
}

pub fn compute_access(user: &UserAccount, now: Timestamp) -> AccessInfo {
    AccessInfo {
        has_premium_access: cache_grants_access(
            user.subscription_status,
            user.premium_access_until,
            now,
        ),
        status: user.subscription_status,
        premium_access_until: user.premium_access_until,
    }
}

/// What a client should offer a user who was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    StartTrial,
    Subscribe,
    Resubscribe,
}

/// Diagnostics attached to a blocking-mode denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDenial {
    pub current_plan: UserSubscriptionStatus,
    pub trial_used: bool,
    pub has_subscription_record: bool,
    pub premium_access_until: Option<Timestamp>,
}

impl AccessDenial {
    pub fn for_user(user: &UserAccount, has_subscription_record: bool) -> Self {
        Self {
            current_plan: user.subscription_status,
            trial_used: user.trial_used,
            has_subscription_record,
            premium_access_until: user.premium_access_until,
        }
    }

    pub fn suggested_action(&self) -> SuggestedAction {
        if !self.trial_used {
            SuggestedAction::StartTrial
        } else if self.has_subscription_record {
            SuggestedAction::Resubscribe
        } else {
            SuggestedAction::Subscribe
        }
    }
}

/// Shortens a premium text field for readers without access.
///
/// Cuts on a character boundary and appends an ellipsis; text within the
/// limit, or any text for a premium reader, is returned untouched.
pub fn premium_preview<'a>(text: &'a str, access: &AccessInfo, limit: usize) -> Cow<'a, str> {
    if access.has_premium_access {
        return Cow::Borrowed(text);
    }
    match text.char_indices().nth(limit) {
        None => Cow::Borrowed(text),
        Some((cut, _)) => Cow::Owned(format!("{}…", text[..cut].trim_end())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::UserId;
    use proptest::prelude::*;

    fn user(status: UserSubscriptionStatus, until: Option<Timestamp>) -> UserAccount {
        let mut user = UserAccount::new(UserId::new("reader-1").unwrap());
        user.subscription_status = status;
        user.premium_access_until = until;
        user
    }

    fn base() -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000).unwrap()
    }

    #[test]
    fn free_user_has_no_access() {
        let info = compute_access(&user(UserSubscriptionStatus::Free, None), base());
        assert!(!info.has_premium_access);
        assert_eq!(info.status, UserSubscriptionStatus::Free);
    }

    #[test]
    fn expired_trial_is_denied_at_read_time() {
        let until = base().add_days(7);
        let trial = user(UserSubscriptionStatus::Trial, Some(until));
        assert!(compute_access(&trial, base()).has_premium_access);
        assert!(!compute_access(&trial, until).has_premium_access);
        assert!(!compute_access(&trial, until.add_days(1)).has_premium_access);
    }

    #[test]
    fn cancelled_keeps_access_until_marker() {
        let until = base().add_days(3);
        let cancelled = user(UserSubscriptionStatus::Cancelled, Some(until));
        assert!(compute_access(&cancelled, base()).has_premium_access);
        assert!(!compute_access(&cancelled, until).has_premium_access);
        assert!(!compute_access(&user(UserSubscriptionStatus::Cancelled, None), base())
            .has_premium_access);
    }

    #[test]
    fn trial_without_end_is_denied() {
        assert!(!cache_grants_access(UserSubscriptionStatus::Trial, None, base()));
    }

    #[test]
    fn denial_suggests_trial_then_resubscribe() {
        let mut reader = user(UserSubscriptionStatus::Free, None);
        assert_eq!(
            AccessDenial::for_user(&reader, false).suggested_action(),
            SuggestedAction::StartTrial
        );

        reader.trial_used = true;
        assert_eq!(
            AccessDenial::for_user(&reader, true).suggested_action(),
            SuggestedAction::Resubscribe
        );
        assert_eq!(
            AccessDenial::for_user(&reader, false).suggested_action(),
            SuggestedAction::Subscribe
        );
    }

    #[test]
    fn preview_truncates_for_free_readers_only() {
        let text = "Bring the needle up through the fabric and loop twice";
        let free = compute_access(&user(UserSubscriptionStatus::Free, None), base());
        let premium = compute_access(&user(UserSubscriptionStatus::PremiumYearly, None), base());

        assert_eq!(premium_preview(text, &premium, 10), text);
        assert_eq!(premium_preview(text, &free, 10), "Bring the…");
        assert_eq!(premium_preview("short", &free, 10), "short");
    }

    #[test]
    fn preview_cuts_on_char_boundary() {
        let free = compute_access(&user(UserSubscriptionStatus::Free, None), base());
        assert_eq!(premium_preview("point de croix", &free, 5), "point…");
        assert_eq!(premium_preview("ééééé", &free, 2), "éé…");
    }

    proptest! {
        #[test]
        fn paid_access_is_monotonic_in_time(
            period_days in 1i64..400,
            read_offset in -500i64..500,
        ) {
            let end = base().add_days(period_days);
            let paid = user(UserSubscriptionStatus::PremiumMonthly, Some(end));
            let read_at = end.add_days(read_offset);

            let has_access = compute_access(&paid, read_at).has_premium_access;
            prop_assert_eq!(has_access, read_at < end);
        }
    }
}
