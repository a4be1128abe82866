//! Subscription aggregate - the per-user entitlement record.
//!
//! One record per user. It is never deleted; cancellation is a state
//! change. Every mutation goes through a method here so the record and
//! the user's access cache (see [`Subscription::access_cache`]) stay
//! derived from the same [`EntitlementState`].

use serde::Serialize;

use super::account::AccessCacheUpdate;
use super::entitlement::EntitlementState;
use super::errors::SubscriptionError;
use super::gateway_event::GatewaySubscription;
use super::plan::{PlanDescriptor, PlanType};
use super::status::SubscriptionStatus;
use super::webhook_log::{WebhookLogEntry, WebhookOutcome};
use crate::domain::foundation::{
    DomainError, ErrorCode, StateMachine, SubscriptionId, Timestamp, UserId,
};

/// The one-time trial grant, kept after the trial ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrialWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TrialWindow {
    pub fn starting(now: Timestamp, trial_days: u32) -> Self {
        Self {
            start: now,
            end: now.add_days(i64::from(trial_days)),
        }
    }
}

/// Gateway entities produced by a successful purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeLinkage {
    pub payment_method_id: String,
    pub gateway_customer_id: String,
    pub charge_id: String,
    /// Recurring billing object that renews the plan, when one was created.
    pub gateway_subscription_id: Option<String>,
}

/// Client-facing summary. Carries no gateway identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSummary {
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub has_premium_access: bool,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub is_trial_active: bool,
    pub trial_end: Option<Timestamp>,
}

/// Flat persisted form of the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionSnapshot {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<Timestamp>,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<Timestamp>,
    pub is_trial_active: bool,
    pub trial_start: Option<Timestamp>,
    pub trial_end: Option<Timestamp>,
    pub payment_method_id: Option<String>,
    pub gateway_customer_id: Option<String>,
    pub gateway_subscription_id: Option<String>,
    pub last_charge_id: Option<String>,
    pub gateway_version: Option<i64>,
    pub webhook_events: Vec<WebhookLogEntry>,
    pub version: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// The entitlement record.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    state: EntitlementState,
    pub trial: Option<TrialWindow>,
    pub payment_method_id: Option<String>,
    pub gateway_customer_id: Option<String>,
    pub gateway_subscription_id: Option<String>,
    pub last_charge_id: Option<String>,
    /// Highest gateway object version applied so far.
    pub gateway_version: Option<i64>,
    webhook_events: Vec<WebhookLogEntry>,
    version: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    fn blank(id: SubscriptionId, user_id: UserId, state: EntitlementState, now: Timestamp) -> Self {
        Self {
            id,
            user_id,
            state,
            trial: None,
            payment_method_id: None,
            gateway_customer_id: None,
            gateway_subscription_id: None,
            last_charge_id: None,
            gateway_version: None,
            webhook_events: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Creation
    // ════════════════════════════════════════════════════════════════════════════

    /// New record for a user's first trial.
    pub fn start_trial(id: SubscriptionId, user_id: UserId, trial_days: u32, now: Timestamp) -> Self {
        let trial = TrialWindow::starting(now, trial_days);
        let mut record = Self::blank(
            id,
            user_id,
            EntitlementState::Trialing {
                started_at: trial.start,
                ends_at: trial.end,
            },
            now,
        );
        record.trial = Some(trial);
        record
    }

    /// New record for a user's first purchase.
    pub fn activate_paid(
        id: SubscriptionId,
        user_id: UserId,
        plan: &PlanDescriptor,
        linkage: ChargeLinkage,
        now: Timestamp,
    ) -> Self {
        let mut record = Self::blank(id, user_id, Self::paid_state(plan, now), now);
        record.link(linkage);
        record
    }

    fn paid_state(plan: &PlanDescriptor, now: Timestamp) -> EntitlementState {
        EntitlementState::ActivePaid {
            plan: plan.plan_type,
            period_start: now,
            period_end: Some(plan.cadence.period_end(now)),
            cancel_at_period_end: false,
        }
    }

    fn link(&mut self, linkage: ChargeLinkage) {
        self.payment_method_id = Some(linkage.payment_method_id);
        self.gateway_customer_id = Some(linkage.gateway_customer_id);
        self.last_charge_id = Some(linkage.charge_id);
        if linkage.gateway_subscription_id.is_some() {
            self.gateway_subscription_id = linkage.gateway_subscription_id;
            self.gateway_version = None;
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // User-initiated transitions
    // ════════════════════════════════════════════════════════════════════════════

    /// Starts a trial on an existing record.
    ///
    /// The caller has already checked the account's `trial_used` flag.
    pub fn begin_trial(&mut self, trial_days: u32, now: Timestamp) -> Result<(), SubscriptionError> {
        if self.state.holds_paid_plan() {
            return Err(SubscriptionError::already_subscribed(self.user_id.clone()));
        }
        self.ensure_transition(SubscriptionStatus::Active, "start a trial on")?;

        let trial = TrialWindow::starting(now, trial_days);
        self.state = EntitlementState::Trialing {
            started_at: trial.start,
            ends_at: trial.end,
        };
        self.trial = Some(trial);
        self.updated_at = now;
        Ok(())
    }

    /// Records a purchase on an existing record (upgrade from trial,
    /// resubscribe after cancellation or lapse).
    pub fn renew_paid(
        &mut self,
        plan: &PlanDescriptor,
        linkage: ChargeLinkage,
        now: Timestamp,
    ) -> Result<(), SubscriptionError> {
        if self.state.holds_paid_plan() {
            return Err(SubscriptionError::duplicate_subscription(self.user_id.clone()));
        }
        self.ensure_transition(SubscriptionStatus::Active, "purchase a plan on")?;

        self.state = Self::paid_state(plan, now);
        self.link(linkage);
        self.updated_at = now;
        Ok(())
    }

    /// Cancels the subscription. Returns when premium access ends, `None`
    /// when it is open-ended.
    ///
    /// At period end only flags an active paid plan; access then lapses
    /// through the normal time check. Trials and already-cancelled records
    /// are left as they are. Records with no paid period to finish are
    /// cancelled immediately.
    pub fn cancel(
        &mut self,
        at_period_end: bool,
        now: Timestamp,
    ) -> Result<Option<Timestamp>, SubscriptionError> {
        if at_period_end {
            match self.state {
                EntitlementState::ActivePaid {
                    plan,
                    period_start,
                    period_end,
                    ..
                } => {
                    self.state = EntitlementState::ActivePaid {
                        plan,
                        period_start,
                        period_end,
                        cancel_at_period_end: true,
                    };
                    self.updated_at = now;
                    return Ok(period_end);
                }
                EntitlementState::Trialing { ends_at, .. } => return Ok(Some(ends_at)),
                EntitlementState::Cancelled { access_until, .. } => return Ok(Some(access_until)),
                _ => {}
            }
        }

        self.ensure_transition(SubscriptionStatus::Cancelled, "cancel")?;
        self.state = self.cancelled_state(now, Some(now));
        self.updated_at = now;
        Ok(self.state.period_end())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Gateway-driven transitions
    // ════════════════════════════════════════════════════════════════════════════

    /// True when `incoming` is older than the version already applied.
    pub fn is_stale(&self, incoming: Option<i64>) -> bool {
        matches!((incoming, self.gateway_version), (Some(incoming), Some(stored)) if incoming < stored)
    }

    /// Raises the stored gateway version; an older `version` is ignored.
    pub fn observe_gateway_version(&mut self, version: Option<i64>) {
        if let Some(version) = version {
            self.gateway_version = Some(self.gateway_version.map_or(version, |v| v.max(version)));
        }
    }

    /// True when an event raised at `event_at` would reopen a cancellation
    /// that happened after it.
    fn predates_cancellation(&self, target: SubscriptionStatus, event_at: Option<Timestamp>) -> bool {
        match (self.state, event_at) {
            (EntitlementState::Cancelled { since, .. }, Some(event_at)) => {
                target != SubscriptionStatus::Cancelled && event_at < since
            }
            _ => false,
        }
    }

    /// Reconciles the record with the gateway's view of the subscription.
    ///
    /// The billing period is recomputed backwards from the charged-through
    /// date using the stored plan's cadence. Stale versions are reported
    /// and not applied, as are events raised before a cancellation that
    /// would undo it. `event_at` is the delivery's creation time.
    pub fn apply_gateway_update(
        &mut self,
        update: &GatewaySubscription,
        event_at: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<WebhookOutcome, SubscriptionError> {
        if self.is_stale(update.version) {
            return Ok(WebhookOutcome::Stale);
        }

        let plan = self.state.plan_type().as_paid().ok_or_else(|| {
            SubscriptionError::invalid_state(
                format!("{} on the free plan", self.state.status()),
                "apply a billing update to",
            )
        })?;
        let status = match update.status.as_deref() {
            Some(raw) => SubscriptionStatus::from_gateway(raw)?,
            None => self.state.status(),
        };
        if self.predates_cancellation(status, event_at) {
            return Ok(WebhookOutcome::Stale);
        }
        let charged_through = update.charged_through()?;
        let period_end = charged_through.or_else(|| self.state.period_end());
        self.ensure_transition(status, "apply a gateway update to")?;

        let period_start = period_end
            .map(|end| plan.cadence().period_start(end))
            .or_else(|| self.state.period_start())
            .unwrap_or(now);

        self.state = match status {
            SubscriptionStatus::Active => EntitlementState::ActivePaid {
                plan,
                period_start,
                period_end,
                cancel_at_period_end: self.state.cancel_at_period_end(),
            },
            SubscriptionStatus::PastDue => EntitlementState::PastDue {
                plan,
                period_start,
                period_end,
            },
            SubscriptionStatus::Cancelled => self.cancelled_state(now, charged_through),
            SubscriptionStatus::Inactive => EntitlementState::Inactive { plan: plan.into() },
            SubscriptionStatus::Pending => EntitlementState::Pending { plan: plan.into() },
        };
        self.observe_gateway_version(update.version);
        self.updated_at = now;
        Ok(WebhookOutcome::Applied)
    }

    /// Marks the record cancelled by the gateway. Access runs to the end of
    /// the window the record currently grants; a record that grants none
    /// stays without access.
    pub fn mark_cancelled_by_gateway(
        &mut self,
        version: Option<i64>,
        now: Timestamp,
    ) -> Result<WebhookOutcome, SubscriptionError> {
        if self.is_stale(version) {
            return Ok(WebhookOutcome::Stale);
        }
        self.ensure_transition(SubscriptionStatus::Cancelled, "cancel")?;

        self.state = self.cancelled_state(now, None);
        self.observe_gateway_version(version);
        self.updated_at = now;
        Ok(WebhookOutcome::Applied)
    }

    /// The cancelled state reached from the current one. Access never
    /// outlasts what the current state grants, and `cap` can only shorten it.
    fn cancelled_state(&self, now: Timestamp, cap: Option<Timestamp>) -> EntitlementState {
        let granted = self.state.granted_until(now);
        let access_until = cap.map_or(granted, |cap| cap.min(granted));
        match self.state {
            EntitlementState::Cancelled { plan, since, .. } => EntitlementState::Cancelled {
                plan,
                since,
                access_until,
            },
            state => EntitlementState::Cancelled {
                plan: state.plan_type(),
                since: now,
                access_until,
            },
        }
    }

    fn ensure_transition(
        &self,
        target: SubscriptionStatus,
        attempted: &str,
    ) -> Result<(), SubscriptionError> {
        let current = self.state.status();
        current
            .transition_to(target)
            .map(|_| ())
            .map_err(|_| SubscriptionError::invalid_state(current.to_string(), attempted))
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Webhook log
    // ════════════════════════════════════════════════════════════════════════════

    pub fn record_webhook(&mut self, entry: WebhookLogEntry) {
        self.webhook_events.push(entry);
    }

    pub fn has_processed_event(&self, event_id: &str) -> bool {
        self.webhook_events.iter().any(|e| e.event_id == event_id)
    }

    pub fn webhook_events(&self) -> &[WebhookLogEntry] {
        &self.webhook_events
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Queries
    // ════════════════════════════════════════════════════════════════════════════

    pub fn state(&self) -> &EntitlementState {
        &self.state
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.state.status()
    }

    pub fn plan_type(&self) -> PlanType {
        self.state.plan_type()
    }

    /// Optimistic-lock version as loaded from storage.
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn has_premium_access(&self, now: Timestamp) -> bool {
        self.state.has_premium_access(now)
    }

    pub fn summary(&self, now: Timestamp) -> SubscriptionSummary {
        SubscriptionSummary {
            plan_type: self.plan_type(),
            status: self.status(),
            has_premium_access: self.has_premium_access(now),
            current_period_end: self.state.period_end(),
            cancel_at_period_end: self.state.cancel_at_period_end(),
            is_trial_active: self.state.is_trial_active(),
            trial_end: self.trial.map(|t| t.end),
        }
    }

    /// The user-cache write matching this record.
    pub fn access_cache(&self, claim_trial: bool) -> AccessCacheUpdate {
        let (subscription_status, premium_access_until) = self.state.user_cache();
        AccessCacheUpdate {
            subscription_status,
            premium_access_until,
            claim_trial,
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Persistence
    // ════════════════════════════════════════════════════════════════════════════

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        let (period_start, period_end) = match self.state {
            EntitlementState::Trialing { .. } => (None, None),
            state => (state.period_start(), state.period_end()),
        };
        let cancelled_at = match self.state {
            EntitlementState::Cancelled { since, .. } => Some(since),
            _ => None,
        };
        SubscriptionSnapshot {
            id: self.id,
            user_id: self.user_id.clone(),
            plan_type: self.plan_type(),
            status: self.status(),
            current_period_start: period_start,
            current_period_end: period_end,
            cancel_at_period_end: self.state.cancel_at_period_end(),
            cancelled_at,
            is_trial_active: self.state.is_trial_active(),
            trial_start: self.trial.map(|t| t.start),
            trial_end: self.trial.map(|t| t.end),
            payment_method_id: self.payment_method_id.clone(),
            gateway_customer_id: self.gateway_customer_id.clone(),
            gateway_subscription_id: self.gateway_subscription_id.clone(),
            last_charge_id: self.last_charge_id.clone(),
            gateway_version: self.gateway_version,
            webhook_events: self.webhook_events.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Rebuilds a record from storage, rejecting field combinations that
    /// no entitlement state produces.
    pub fn restore(s: SubscriptionSnapshot) -> Result<Self, DomainError> {
        let corrupt = |reason: &str| {
            DomainError::new(
                ErrorCode::CorruptRecord,
                format!("Subscription {} is inconsistent: {}", s.id, reason),
            )
        };

        let trial = match (s.trial_start, s.trial_end) {
            (Some(start), Some(end)) => Some(TrialWindow { start, end }),
            (None, None) => None,
            _ => return Err(corrupt("trial window is half set")),
        };

        if let (Some(start), Some(end)) = (s.current_period_start, s.current_period_end) {
            if end < start {
                return Err(corrupt("period ends before it starts"));
            }
        }

        let state = match s.status {
            SubscriptionStatus::Active if s.is_trial_active => {
                let trial = trial.ok_or_else(|| corrupt("active trial without trial window"))?;
                if s.plan_type != PlanType::Free {
                    return Err(corrupt("trial on a paid plan"));
                }
                EntitlementState::Trialing {
                    started_at: trial.start,
                    ends_at: trial.end,
                }
            }
            SubscriptionStatus::Active => EntitlementState::ActivePaid {
                plan: s
                    .plan_type
                    .as_paid()
                    .ok_or_else(|| corrupt("active free plan without a trial"))?,
                period_start: s.current_period_start.unwrap_or(s.created_at),
                period_end: s.current_period_end,
                cancel_at_period_end: s.cancel_at_period_end,
            },
            SubscriptionStatus::PastDue => EntitlementState::PastDue {
                plan: s
                    .plan_type
                    .as_paid()
                    .ok_or_else(|| corrupt("past due on the free plan"))?,
                period_start: s.current_period_start.unwrap_or(s.created_at),
                period_end: s.current_period_end,
            },
            SubscriptionStatus::Cancelled => {
                let since = s.cancelled_at.unwrap_or(s.updated_at);
                EntitlementState::Cancelled {
                    plan: s.plan_type,
                    since,
                    access_until: s.current_period_end.unwrap_or(since),
                }
            }
            SubscriptionStatus::Pending => EntitlementState::Pending { plan: s.plan_type },
            SubscriptionStatus::Inactive => EntitlementState::Inactive { plan: s.plan_type },
        };

        Ok(Self {
            id: s.id,
            user_id: s.user_id,
            state,
            trial,
            payment_method_id: s.payment_method_id,
            gateway_customer_id: s.gateway_customer_id,
            gateway_subscription_id: s.gateway_subscription_id,
            last_charge_id: s.last_charge_id,
            gateway_version: s.gateway_version,
            webhook_events: s.webhook_events,
            version: s.version,
            created_at: s.created_at,
            updated_at: s.updated_at,
        })
    }
}
