//! StartTrialHandler - Command handler for the one-time free trial.

use std::sync::Arc;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp, UserId};
use crate::domain::subscription::{Subscription, SubscriptionError, SubscriptionSummary};
use crate::ports::{SubscriptionRepository, UserAccountRepository};

use super::{load_user, map_write_error};

pub const DEFAULT_TRIAL_DAYS: u32 = 7;

/// Longest trial accepted.
const MAX_TRIAL_DAYS: i64 = 365;

/// Command to start a trial.
#[derive(Debug, Clone)]
pub struct StartTrialCommand {
    pub user_id: UserId,
    /// Trial length; the handler default when `None`.
    pub trial_days: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct StartTrialResult {
    pub subscription: SubscriptionSummary,
    pub premium_access_until: Timestamp,
}

/// Handler for starting a trial.
///
/// The record write and the user's `trial_used` flip happen in one store
/// write, so two racing requests cannot both get a trial.
pub struct StartTrialHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    users: Arc<dyn UserAccountRepository>,
    default_trial_days: u32,
}

impl StartTrialHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        users: Arc<dyn UserAccountRepository>,
    ) -> Self {
        Self {
            subscriptions,
            users,
            default_trial_days: DEFAULT_TRIAL_DAYS,
        }
    }

    pub fn with_default_trial_days(mut self, days: u32) -> Self {
        self.default_trial_days = days;
        self
    }

    pub async fn handle(&self, cmd: StartTrialCommand) -> Result<StartTrialResult, SubscriptionError> {
        let trial_days = self.validate_days(cmd.trial_days)?;

        let user = load_user(self.users.as_ref(), &cmd.user_id).await?;
        if user.trial_used {
            return Err(SubscriptionError::trial_already_used(cmd.user_id));
        }

        let now = Timestamp::now();
        let record = match self.subscriptions.find_by_user_id(&cmd.user_id).await? {
            Some(mut existing) => {
                existing.begin_trial(trial_days, now)?;
                self.subscriptions
                    .update(&existing, existing.access_cache(true))
                    .await
                    .map_err(|e| self.conflict(e, &cmd.user_id))?;
                existing
            }
            None => {
                let record = Subscription::start_trial(
                    SubscriptionId::new(),
                    cmd.user_id.clone(),
                    trial_days,
                    now,
                );
                self.subscriptions
                    .insert(&record, record.access_cache(true))
                    .await
                    .map_err(|e| self.conflict(e, &cmd.user_id))?;
                record
            }
        };

        let premium_access_until = now.add_days(i64::from(trial_days));
        tracing::info!(
            user_id = %cmd.user_id,
            trial_days,
            until = %premium_access_until,
            "Trial started"
        );

        Ok(StartTrialResult {
            subscription: record.summary(now),
            premium_access_until,
        })
    }

    fn validate_days(&self, requested: Option<i64>) -> Result<u32, SubscriptionError> {
        let days = requested.unwrap_or(i64::from(self.default_trial_days));
        if !(1..=MAX_TRIAL_DAYS).contains(&days) {
            return Err(SubscriptionError::invalid_input(
                "trial_days",
                format!("must be between 1 and {}", MAX_TRIAL_DAYS),
            ));
        }
        u32::try_from(days)
            .map_err(|_| SubscriptionError::invalid_input("trial_days", "out of range"))
    }

    /// A lost race on the record is reported as the trial being used.
    fn conflict(&self, err: DomainError, user_id: &UserId) -> SubscriptionError {
        map_write_error(err, user_id, SubscriptionError::trial_already_used)
    }
}
