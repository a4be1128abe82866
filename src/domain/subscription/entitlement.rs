//! The entitlement state of a subscription as a closed set of variants.
//!
//! Each variant carries exactly the data that is meaningful in that state,
//! so combinations such as "past due on the free plan" or "trial with a
//! paid period" cannot be represented.

use serde::{Deserialize, Serialize};

use super::plan::{PaidPlan, PlanType};
use super::status::{SubscriptionStatus, UserSubscriptionStatus};
use crate::domain::foundation::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntitlementState {
    /// No entitlement.
    Inactive { plan: PlanType },

    /// Time-boxed free premium access.
    Trialing {
        started_at: Timestamp,
        ends_at: Timestamp,
    },

    /// Waiting for the gateway to confirm the first charge.
    Pending { plan: PlanType },

    /// Paid and in good standing. `period_end` is only `None` for records
    /// written before billing periods were tracked.
    ActivePaid {
        plan: PaidPlan,
        period_start: Timestamp,
        period_end: Option<Timestamp>,
        cancel_at_period_end: bool,
    },

    /// The latest invoice failed.
    PastDue {
        plan: PaidPlan,
        period_start: Timestamp,
        period_end: Option<Timestamp>,
    },

    /// Cancelled at `since`; premium access lasts until `access_until`.
    Cancelled {
        plan: PlanType,
        since: Timestamp,
        access_until: Timestamp,
    },
}

impl EntitlementState {
    pub fn status(&self) -> SubscriptionStatus {
        match self {
            EntitlementState::Inactive { .. } => SubscriptionStatus::Inactive,
            EntitlementState::Trialing { .. } => SubscriptionStatus::Active,
            EntitlementState::Pending { .. } => SubscriptionStatus::Pending,
            EntitlementState::ActivePaid { .. } => SubscriptionStatus::Active,
            EntitlementState::PastDue { .. } => SubscriptionStatus::PastDue,
            EntitlementState::Cancelled { .. } => SubscriptionStatus::Cancelled,
        }
    }

    pub fn plan_type(&self) -> PlanType {
        match self {
            EntitlementState::Inactive { plan }
            | EntitlementState::Pending { plan }
            | EntitlementState::Cancelled { plan, .. } => *plan,
            EntitlementState::Trialing { .. } => PlanType::Free,
            EntitlementState::ActivePaid { plan, .. } | EntitlementState::PastDue { plan, .. } => {
                (*plan).into()
            }
        }
    }

    /// Whether premium content is visible at `now`.
    pub fn has_premium_access(&self, now: Timestamp) -> bool {
        match self {
            EntitlementState::Trialing { ends_at, .. } => now < *ends_at,
            EntitlementState::ActivePaid { period_end, .. } => {
                period_end.map_or(true, |end| now < end)
            }
            EntitlementState::Cancelled { access_until, .. } => now < *access_until,
            EntitlementState::Inactive { .. }
            | EntitlementState::Pending { .. }
            | EntitlementState::PastDue { .. } => false,
        }
    }

    /// True for a paid plan that is active or awaiting its first charge.
    pub fn holds_paid_plan(&self) -> bool {
        match self {
            EntitlementState::ActivePaid { .. } => true,
            EntitlementState::Pending { plan } => plan.is_paid(),
            _ => false,
        }
    }

    pub fn is_trial_active(&self) -> bool {
        matches!(self, EntitlementState::Trialing { .. })
    }

    pub fn period_start(&self) -> Option<Timestamp> {
        match self {
            EntitlementState::ActivePaid { period_start, .. }
            | EntitlementState::PastDue { period_start, .. } => Some(*period_start),
            EntitlementState::Trialing { started_at, .. } => Some(*started_at),
            _ => None,
        }
    }

    /// End of the window that currently grants (or last granted) access.
    pub fn period_end(&self) -> Option<Timestamp> {
        match self {
            EntitlementState::ActivePaid { period_end, .. }
            | EntitlementState::PastDue { period_end, .. } => *period_end,
            EntitlementState::Trialing { ends_at, .. } => Some(*ends_at),
            EntitlementState::Cancelled { access_until, .. } => Some(*access_until),
            _ => None,
        }
    }

    /// End of the premium window this state grants right now; `now` when
    /// it grants none. A paid period without a tracked end is bounded by
    /// one cadence from its start.
    pub fn granted_until(&self, now: Timestamp) -> Timestamp {
        match self {
            EntitlementState::Trialing { ends_at, .. } => *ends_at,
            EntitlementState::ActivePaid {
                period_end: Some(end),
                ..
            } => *end,
            EntitlementState::ActivePaid {
                plan,
                period_start,
                period_end: None,
                ..
            } => plan.cadence().period_end(*period_start),
            EntitlementState::Cancelled { access_until, .. } => *access_until,
            EntitlementState::Inactive { .. }
            | EntitlementState::Pending { .. }
            | EntitlementState::PastDue { .. } => now,
        }
    }

    pub fn cancel_at_period_end(&self) -> bool {
        matches!(
            self,
            EntitlementState::ActivePaid {
                cancel_at_period_end: true,
                ..
            }
        )
    }

    /// The `(status, premium_access_until)` pair cached on the user account.
    pub fn user_cache(&self) -> (UserSubscriptionStatus, Option<Timestamp>) {
        match self {
            EntitlementState::Trialing { ends_at, .. } => {
                (UserSubscriptionStatus::Trial, Some(*ends_at))
            }
            EntitlementState::ActivePaid {
                plan, period_end, ..
            } => {
                let status = match plan {
                    PaidPlan::PremiumMonthly => UserSubscriptionStatus::PremiumMonthly,
                    PaidPlan::PremiumYearly => UserSubscriptionStatus::PremiumYearly,
                };
                (status, *period_end)
            }
            EntitlementState::Cancelled { access_until, .. } => {
                (UserSubscriptionStatus::Cancelled, Some(*access_until))
            }
            EntitlementState::Inactive { .. }
            | EntitlementState::Pending { .. }
            | EntitlementState::PastDue { .. } => (UserSubscriptionStatus::Free, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(days: i64) -> Timestamp {
        Timestamp::from_unix_secs(1_700_000_000).unwrap().add_days(days)
    }

    #[test]
    fn trial_grants_access_until_end() {
        let state = EntitlementState::Trialing {
            started_at: t(0),
            ends_at: t(7),
        };
        assert!(state.has_premium_access(t(6)));
        assert!(!state.has_premium_access(t(7)));
        assert_eq!(state.status(), SubscriptionStatus::Active);
        assert_eq!(state.plan_type(), PlanType::Free);
    }

    #[test]
    fn paid_without_period_end_grants_access() {
        let state = EntitlementState::ActivePaid {
            plan: PaidPlan::PremiumYearly,
            period_start: t(0),
            period_end: None,
            cancel_at_period_end: false,
        };
        assert!(state.has_premium_access(t(10_000)));
    }

    #[test]
    fn past_due_and_pending_deny() {
        let past_due = EntitlementState::PastDue {
            plan: PaidPlan::PremiumMonthly,
            period_start: t(0),
            period_end: Some(t(30)),
        };
        assert!(!past_due.has_premium_access(t(1)));
        assert!(!EntitlementState::Pending {
            plan: PlanType::PremiumMonthly
        }
        .has_premium_access(t(1)));
    }

    #[test]
    fn cancelled_keeps_access_until_recorded_end() {
        let state = EntitlementState::Cancelled {
            plan: PlanType::PremiumMonthly,
            since: t(5),
            access_until: t(30),
        };
        assert!(state.has_premium_access(t(29)));
        assert!(!state.has_premium_access(t(30)));
    }

    #[test]
    fn granted_until_is_now_for_states_without_access() {
        let past_due = EntitlementState::PastDue {
            plan: PaidPlan::PremiumMonthly,
            period_start: t(0),
            period_end: Some(t(30)),
        };
        assert_eq!(past_due.granted_until(t(3)), t(3));
        assert_eq!(
            EntitlementState::Inactive {
                plan: PlanType::PremiumMonthly
            }
            .granted_until(t(3)),
            t(3)
        );
    }

    #[test]
    fn granted_until_follows_the_open_window() {
        let trial = EntitlementState::Trialing {
            started_at: t(0),
            ends_at: t(7),
        };
        assert_eq!(trial.granted_until(t(1)), t(7));

        let untracked = EntitlementState::ActivePaid {
            plan: PaidPlan::PremiumMonthly,
            period_start: t(0),
            period_end: None,
            cancel_at_period_end: false,
        };
        assert_eq!(
            untracked.granted_until(t(1)),
            PaidPlan::PremiumMonthly.cadence().period_end(t(0))
        );
    }

    #[test]
    fn pending_paid_plan_counts_as_held() {
        assert!(EntitlementState::Pending {
            plan: PlanType::PremiumYearly
        }
        .holds_paid_plan());
        assert!(!EntitlementState::Pending {
            plan: PlanType::Free
        }
        .holds_paid_plan());
        assert!(!EntitlementState::Trialing {
            started_at: t(0),
            ends_at: t(7)
        }
        .holds_paid_plan());
    }

    #[test]
    fn user_cache_for_paid_plan_uses_period_end() {
        let state = EntitlementState::ActivePaid {
            plan: PaidPlan::PremiumMonthly,
            period_start: t(0),
            period_end: Some(t(31)),
            cancel_at_period_end: true,
        };
        assert_eq!(
            state.user_cache(),
            (UserSubscriptionStatus::PremiumMonthly, Some(t(31)))
        );
        assert!(state.cancel_at_period_end());
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_value(EntitlementState::Inactive {
            plan: PlanType::Free,
        })
        .unwrap();
        assert_eq!(json["state"], "inactive");
        assert_eq!(json["plan"], "free");
    }
}
