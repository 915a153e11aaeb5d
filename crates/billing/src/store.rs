//! Subscription persistence
//!
//! [`SubscriptionRepo`] is the seam between the orchestrator and storage; the
//! production implementation is a thin sqlx layer over Postgres. Writes only
//! ever happen from the provider's authoritative response.

use std::future::Future;

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::provider::ProviderSubscription;
use crate::state::Subscription;

/// An account with its (possibly empty) subscription record.
#[derive(Debug, Clone)]
pub struct AccountBilling {
    pub account_id: Uuid,
    pub email: String,
    pub is_admin: bool,
    pub stripe_customer_id: Option<String>,
    pub subscription: Subscription,
}

/// A VM row as owned by an account.
#[derive(Debug, Clone)]
pub struct VmRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub hypervisor_vmid: i64,
    pub name: String,
}

/// Storage operations the orchestrator and the API layer need.
pub trait SubscriptionRepo: Send + Sync + 'static {
    fn account_billing(
        &self,
        account_id: Uuid,
    ) -> impl Future<Output = BillingResult<AccountBilling>> + Send;

    /// Overwrite the local subscription record with the provider's response.
    /// This is the only write path for provider-backed fields.
    fn overwrite_from_provider(
        &self,
        account_id: Uuid,
        sub: &ProviderSubscription,
    ) -> impl Future<Output = BillingResult<()>> + Send;
}

#[derive(Debug, sqlx::FromRow)]
struct AccountBillingRow {
    account_id: Uuid,
    email: String,
    is_admin: bool,
    stripe_customer_id: Option<String>,
    plan_id: Option<String>,
    vm_count: Option<i32>,
    expires_at: Option<OffsetDateTime>,
    cancel_at_period_end: Option<bool>,
    stripe_subscription_id: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct VmRow {
    id: Uuid,
    account_id: Uuid,
    hypervisor_vmid: i64,
    name: String,
}

/// Postgres-backed [`SubscriptionRepo`].
#[derive(Clone)]
pub struct SubscriptionStore {
    pool: PgPool,
}

impl SubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up a VM and verify it belongs to the account
    pub async fn vm_for_account(&self, account_id: Uuid, vm_id: Uuid) -> BillingResult<VmRecord> {
        let row: Option<VmRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, hypervisor_vmid, name
            FROM vms
            WHERE id = $1 AND account_id = $2
            "#,
        )
        .bind(vm_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(BillingError::VmNotFound(vm_id))?;
        Ok(VmRecord {
            id: row.id,
            account_id: row.account_id,
            hypervisor_vmid: row.hypervisor_vmid,
            name: row.name,
        })
    }
}

impl SubscriptionRepo for SubscriptionStore {
    async fn account_billing(&self, account_id: Uuid) -> BillingResult<AccountBilling> {
        let row: Option<AccountBillingRow> = sqlx::query_as(
            r#"
            SELECT
                a.id as account_id,
                a.email,
                a.is_admin,
                a.stripe_customer_id,
                s.plan_id,
                s.vm_count,
                s.expires_at,
                s.cancel_at_period_end,
                s.stripe_subscription_id
            FROM accounts a
            LEFT JOIN subscriptions s ON s.account_id = a.id
            WHERE a.id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(BillingError::AccountNotFound(account_id))?;

        Ok(AccountBilling {
            account_id: row.account_id,
            email: row.email,
            is_admin: row.is_admin,
            stripe_customer_id: row.stripe_customer_id,
            subscription: Subscription {
                plan_id: row.plan_id,
                vm_count: row.vm_count.unwrap_or(0),
                expires_at: row.expires_at,
                cancel_at_period_end: row.cancel_at_period_end.unwrap_or(false),
                provider_subscription_id: row.stripe_subscription_id,
            },
        })
    }

    async fn overwrite_from_provider(
        &self,
        account_id: Uuid,
        sub: &ProviderSubscription,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (account_id, plan_id, vm_count, expires_at, cancel_at_period_end,
                 stripe_subscription_id, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (account_id) DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                vm_count = EXCLUDED.vm_count,
                expires_at = EXCLUDED.expires_at,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                updated_at = now()
            "#,
        )
        .bind(account_id)
        .bind(&sub.plan_id)
        .bind(sub.quantity as i32)
        .bind(sub.expires_at)
        .bind(sub.cancel_at_period_end)
        .bind(&sub.provider_subscription_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            account_id = %account_id,
            plan_id = %sub.plan_id,
            quantity = sub.quantity,
            "Subscription record overwritten from provider response"
        );

        Ok(())
    }
}
