//! PostgreSQL implementation of the subscription, user-account and
//! webhook-ledger ports.
//!
//! Every subscription write runs in one transaction together with the
//! matching write to the user's access cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp, UserId};
use crate::domain::subscription::{
    AccessCacheUpdate, PlanType, Subscription, SubscriptionSnapshot, SubscriptionStatus,
    UserAccount, UserSubscriptionStatus, WebhookLogEntry, WebhookOutcome,
};
use crate::ports::{
    SaveResult, SubscriptionRepository, UserAccountRepository, WebhookEventRecord,
    WebhookEventRepository,
};

/// PostgreSQL implementation of the storage ports.
///
/// Uses sqlx with connection pooling.
#[derive(Clone)]
pub struct PostgresAccountStore {
    pool: PgPool,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, user_id, plan_type, status, current_period_start, current_period_end,
    cancel_at_period_end, cancelled_at, is_trial_active, trial_start, trial_end,
    payment_method_id, gateway_customer_id, gateway_subscription_id, last_charge_id,
    gateway_version, webhook_events, version, created_at, updated_at
"#;

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: String,
    plan_type: String,
    status: String,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    cancelled_at: Option<DateTime<Utc>>,
    is_trial_active: bool,
    trial_start: Option<DateTime<Utc>>,
    trial_end: Option<DateTime<Utc>>,
    payment_method_id: Option<String>,
    gateway_customer_id: Option<String>,
    gateway_subscription_id: Option<String>,
    last_charge_id: Option<String>,
    gateway_version: Option<i64>,
    webhook_events: serde_json::Value,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionSnapshot {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let webhook_events: Vec<WebhookLogEntry> = serde_json::from_value(row.webhook_events)
            .map_err(|e| corrupt(format!("Invalid webhook log for {}: {}", row.id, e)))?;

        Ok(SubscriptionSnapshot {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(|e| corrupt(format!("Invalid user_id: {}", e)))?,
            plan_type: PlanType::parse(&row.plan_type).map_err(|e| corrupt(e.to_string()))?,
            status: SubscriptionStatus::parse(&row.status).map_err(|e| corrupt(e.to_string()))?,
            current_period_start: row.current_period_start.map(Timestamp::from_datetime),
            current_period_end: row.current_period_end.map(Timestamp::from_datetime),
            cancel_at_period_end: row.cancel_at_period_end,
            cancelled_at: row.cancelled_at.map(Timestamp::from_datetime),
            is_trial_active: row.is_trial_active,
            trial_start: row.trial_start.map(Timestamp::from_datetime),
            trial_end: row.trial_end.map(Timestamp::from_datetime),
            payment_method_id: row.payment_method_id,
            gateway_customer_id: row.gateway_customer_id,
            gateway_subscription_id: row.gateway_subscription_id,
            last_charge_id: row.last_charge_id,
            gateway_version: row.gateway_version,
            webhook_events,
            version: row.version,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

fn row_to_subscription(row: SubscriptionRow) -> Result<Subscription, DomainError> {
    Subscription::restore(SubscriptionSnapshot::try_from(row)?)
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: Option<String>,
    subscription_status: String,
    premium_access_until: Option<DateTime<Utc>>,
    trial_used: bool,
    gateway_customer_id: Option<String>,
}

impl TryFrom<UserRow> for UserAccount {
    type Error = DomainError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserAccount {
            id: UserId::new(row.id).map_err(|e| corrupt(format!("Invalid user id: {}", e)))?,
            email: row.email,
            subscription_status: UserSubscriptionStatus::parse(&row.subscription_status)
                .map_err(|e| corrupt(e.to_string()))?,
            premium_access_until: row.premium_access_until.map(Timestamp::from_datetime),
            trial_used: row.trial_used,
            gateway_customer_id: row.gateway_customer_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    event_id: String,
    event_type: String,
    processed_at: DateTime<Utc>,
    outcome: String,
    error_message: Option<String>,
    payload: serde_json::Value,
}

impl TryFrom<WebhookEventRow> for WebhookEventRecord {
    type Error = DomainError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        Ok(WebhookEventRecord {
            event_id: row.event_id,
            event_type: row.event_type,
            processed_at: Timestamp::from_datetime(row.processed_at),
            outcome: WebhookOutcome::parse(&row.outcome).map_err(|e| corrupt(e.to_string()))?,
            error_message: row.error_message,
            payload: row.payload,
        })
    }
}

fn corrupt(message: impl Into<String>) -> DomainError {
    DomainError::new(ErrorCode::CorruptRecord, message)
}

fn db_error(context: &str, err: sqlx::Error) -> DomainError {
    DomainError::database(format!("{}: {}", context, err))
}

fn opt_datetime(ts: Option<Timestamp>) -> Option<DateTime<Utc>> {
    ts.map(|t| *t.as_datetime())
}

/// Writes the access cache for `user_id` inside `tx`, refusing a second
/// trial claim. The user row is locked until the transaction ends.
async fn write_cache(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &UserId,
    cache: AccessCacheUpdate,
) -> Result<(), DomainError> {
    let trial_used: Option<bool> =
        sqlx::query_scalar("SELECT trial_used FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| db_error("Failed to lock user", e))?;

    let trial_used = trial_used.ok_or_else(|| {
        DomainError::new(ErrorCode::UserNotFound, format!("User {} not found", user_id))
    })?;
    if cache.claim_trial && trial_used {
        return Err(DomainError::new(
            ErrorCode::TrialAlreadyUsed,
            format!("User {} has already used their trial", user_id),
        ));
    }

    sqlx::query(
        r#"
        UPDATE users SET
            subscription_status = $2,
            premium_access_until = $3,
            trial_used = trial_used OR $4,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id.as_str())
    .bind(cache.subscription_status.as_str())
    .bind(opt_datetime(cache.premium_access_until))
    .bind(cache.claim_trial)
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to update access cache", e))?;

    Ok(())
}

#[async_trait]
impl SubscriptionRepository for PostgresAccountStore {
    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find subscription", e))?;

        row.map(row_to_subscription).transpose()
    }

    async fn find_by_gateway_subscription_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE gateway_subscription_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(gateway_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find subscription", e))?;

        row.map(row_to_subscription).transpose()
    }

    async fn insert(
        &self,
        subscription: &Subscription,
        cache: AccessCacheUpdate,
    ) -> Result<(), DomainError> {
        let s = subscription.snapshot();
        let webhook_events = serde_json::to_value(&s.webhook_events)
            .map_err(|e| DomainError::new(ErrorCode::InternalError, e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        write_cache(&mut tx, &s.user_id, cache).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, plan_type, status, current_period_start, current_period_end,
                cancel_at_period_end, cancelled_at, is_trial_active, trial_start, trial_end,
                payment_method_id, gateway_customer_id, gateway_subscription_id, last_charge_id,
                gateway_version, webhook_events, version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, 1, $18, $19)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(s.id.as_uuid())
        .bind(s.user_id.as_str())
        .bind(s.plan_type.as_str())
        .bind(s.status.as_str())
        .bind(opt_datetime(s.current_period_start))
        .bind(opt_datetime(s.current_period_end))
        .bind(s.cancel_at_period_end)
        .bind(opt_datetime(s.cancelled_at))
        .bind(s.is_trial_active)
        .bind(opt_datetime(s.trial_start))
        .bind(opt_datetime(s.trial_end))
        .bind(&s.payment_method_id)
        .bind(&s.gateway_customer_id)
        .bind(&s.gateway_subscription_id)
        .bind(&s.last_charge_id)
        .bind(s.gateway_version)
        .bind(webhook_events)
        .bind(s.created_at.as_datetime())
        .bind(s.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to insert subscription", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionExists,
                format!("User {} already has a subscription record", s.user_id),
            ));
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit subscription insert", e))
    }

    async fn update(
        &self,
        subscription: &Subscription,
        cache: AccessCacheUpdate,
    ) -> Result<(), DomainError> {
        let s = subscription.snapshot();
        let webhook_events = serde_json::to_value(&s.webhook_events)
            .map_err(|e| DomainError::new(ErrorCode::InternalError, e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        // User row first, matching insert's lock order.
        write_cache(&mut tx, &s.user_id, cache).await?;

        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                plan_type = $3,
                status = $4,
                current_period_start = $5,
                current_period_end = $6,
                cancel_at_period_end = $7,
                cancelled_at = $8,
                is_trial_active = $9,
                trial_start = $10,
                trial_end = $11,
                payment_method_id = $12,
                gateway_customer_id = $13,
                gateway_subscription_id = $14,
                last_charge_id = $15,
                gateway_version = $16,
                webhook_events = $17,
                updated_at = $18,
                version = version + 1
            WHERE user_id = $1 AND version = $2
            "#,
        )
        .bind(s.user_id.as_str())
        .bind(s.version)
        .bind(s.plan_type.as_str())
        .bind(s.status.as_str())
        .bind(opt_datetime(s.current_period_start))
        .bind(opt_datetime(s.current_period_end))
        .bind(s.cancel_at_period_end)
        .bind(opt_datetime(s.cancelled_at))
        .bind(s.is_trial_active)
        .bind(opt_datetime(s.trial_start))
        .bind(opt_datetime(s.trial_end))
        .bind(&s.payment_method_id)
        .bind(&s.gateway_customer_id)
        .bind(&s.gateway_subscription_id)
        .bind(&s.last_charge_id)
        .bind(s.gateway_version)
        .bind(webhook_events)
        .bind(s.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to update subscription", e))?;

        if result.rows_affected() == 0 {
            let exists: Option<i32> =
                sqlx::query_scalar("SELECT version FROM subscriptions WHERE user_id = $1")
                    .bind(s.user_id.as_str())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| db_error("Failed to read subscription version", e))?;
            return Err(match exists {
                None => DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("No subscription for user {}", s.user_id),
                ),
                Some(found) => DomainError::new(
                    ErrorCode::ConcurrentModification,
                    format!(
                        "Subscription {} changed (expected version {}, found {})",
                        s.id, s.version, found
                    ),
                ),
            });
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit subscription update", e))
    }
}

#[async_trait]
impl UserAccountRepository for PostgresAccountStore {
    async fn find_by_id(&self, user_id: &UserId) -> Result<Option<UserAccount>, DomainError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, subscription_status, premium_access_until, trial_used,
                   gateway_customer_id
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find user", e))?;

        row.map(UserAccount::try_from).transpose()
    }

    async fn set_gateway_customer_id(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            "UPDATE users SET gateway_customer_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id.as_str())
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to store gateway customer id", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::UserNotFound,
                format!("User {} not found", user_id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookEventRepository for PostgresAccountStore {
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        let row: Option<WebhookEventRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, processed_at, outcome, error_message, payload
            FROM webhook_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find webhook event", e))?;

        row.map(WebhookEventRecord::try_from).transpose()
    }

    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (
                event_id, event_type, processed_at, outcome, error_message, payload
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&record.event_id)
        .bind(&record.event_type)
        .bind(record.processed_at.as_datetime())
        .bind(record.outcome.as_str())
        .bind(&record.error_message)
        .bind(&record.payload)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save webhook event", e))?;

        Ok(if result.rows_affected() == 0 {
            SaveResult::AlreadyExists
        } else {
            SaveResult::Inserted
        })
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM webhook_events WHERE processed_at < $1")
            .bind(cutoff.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to purge webhook events", e))?;

        Ok(result.rows_affected())
    }
}
