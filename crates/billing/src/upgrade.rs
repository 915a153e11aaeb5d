//! Upgrade orchestrator
//!
//! Decides new-subscription vs upgrade and runs the one external billing
//! call. Mutations are serialized per account: a second request arriving
//! while one is in flight is rejected with `AlreadyInProgress` rather than
//! raced against the provider. The guard is held across the provider round
//! trip plus the local write and released on completion or failure.
//!
//! A timeout or failure on the provider call leaves the local record
//! byte-for-byte unchanged and surfaces as a retryable error, never as
//! silent success.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::PlanCatalog;
use crate::error::{BillingError, BillingResult};
use crate::pricing;
use crate::provider::BillingProvider;
use crate::state::{Subscription, SubscriptionState};
use crate::store::SubscriptionRepo;

/// Which flow a subscribe/upgrade request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeDecision {
    /// Full checkout path; no usable billing relationship exists
    NewSubscription,
    /// Swap plan/quantity on the existing billing relationship
    Upgrade,
}

/// Outcome of a subscribe/upgrade request.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeOutcome {
    pub action: UpgradeDecision,
    /// Checkout URL when the action is `NewSubscription`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// Route a request to the checkout path or the in-place upgrade path.
///
/// Pure: an expired or never-provisioned subscription always goes through
/// checkout; an Active/Cancelling provider-backed one is swapped in place.
pub fn decide(subscription: &Subscription, now: OffsetDateTime) -> UpgradeDecision {
    if !subscription.is_provider_backed() {
        return UpgradeDecision::NewSubscription;
    }
    match SubscriptionState::classify(subscription, now) {
        SubscriptionState::None | SubscriptionState::Expired => UpgradeDecision::NewSubscription,
        SubscriptionState::Active | SubscriptionState::Cancelling => UpgradeDecision::Upgrade,
    }
}

/// Serializes billing mutations per account and talks to the provider.
pub struct UpgradeOrchestrator<P, S> {
    catalog: Arc<PlanCatalog>,
    provider: Arc<P>,
    repo: S,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    provider_timeout: Duration,
}

/// Removes the account from the in-flight set when the operation ends,
/// successfully or not.
struct InFlightGuard {
    account_id: Uuid,
    registry: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_registry(&self.registry).remove(&self.account_id);
    }
}

fn lock_registry(registry: &Mutex<HashSet<Uuid>>) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
    // A poisoned lock only means another guard panicked mid-remove; the set
    // itself is still coherent
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

impl<P: BillingProvider, S: SubscriptionRepo> UpgradeOrchestrator<P, S> {
    pub fn new(catalog: Arc<PlanCatalog>, provider: Arc<P>, repo: S) -> Self {
        Self {
            catalog,
            provider,
            repo,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            provider_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Claim the per-account mutation slot, or fail with `AlreadyInProgress`.
    fn begin(&self, account_id: Uuid) -> BillingResult<InFlightGuard> {
        let mut set = lock_registry(&self.in_flight);
        if !set.insert(account_id) {
            return Err(BillingError::AlreadyInProgress);
        }
        Ok(InFlightGuard {
            account_id,
            registry: Arc::clone(&self.in_flight),
        })
    }

    /// Bound the single external suspension point. On timeout the local
    /// record has not been touched and the caller may retry after a read.
    async fn call_provider<T>(
        &self,
        fut: impl std::future::Future<Output = BillingResult<T>>,
    ) -> BillingResult<T> {
        match tokio::time::timeout(self.provider_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BillingError::ProviderUnavailable(
                "billing provider call timed out".to_string(),
            )),
        }
    }

    /// Subscribe or upgrade an account to `plan_id` x `quantity`.
    ///
    /// Local validation (plan exists, quantity quotable) resolves before the
    /// provider is ever contacted. On the upgrade path, the provider's
    /// response overwrites the local record; the caller's values were only a
    /// proposal.
    pub async fn subscribe_or_upgrade(
        &self,
        account_id: Uuid,
        plan_id: &str,
        quantity: i64,
    ) -> BillingResult<UpgradeOutcome> {
        // Quotability doubles as quantity validation for the whole request
        pricing::quote(&self.catalog, plan_id, quantity)?;

        let _guard = self.begin(account_id)?;

        let account = self.repo.account_billing(account_id).await?;
        let now = OffsetDateTime::now_utc();
        let decision = decide(&account.subscription, now);

        match decision {
            UpgradeDecision::NewSubscription => {
                let redirect = self
                    .call_provider(self.provider.create_checkout(account_id, plan_id, quantity))
                    .await?;

                tracing::info!(
                    account_id = %account_id,
                    plan_id,
                    quantity,
                    "Routed to checkout"
                );

                Ok(UpgradeOutcome {
                    action: UpgradeDecision::NewSubscription,
                    redirect_url: Some(redirect.url),
                })
            }
            UpgradeDecision::Upgrade => {
                let sub_id = account
                    .subscription
                    .provider_subscription_id
                    .as_deref()
                    // decide() only returns Upgrade for provider-backed records
                    .ok_or(BillingError::NoProviderSubscription)?;

                let authoritative = self
                    .call_provider(self.provider.update_subscription(sub_id, plan_id, quantity))
                    .await?;

                self.repo
                    .overwrite_from_provider(account_id, &authoritative)
                    .await?;

                tracing::info!(
                    account_id = %account_id,
                    plan_id = %authoritative.plan_id,
                    quantity = authoritative.quantity,
                    "Upgraded existing subscription"
                );

                Ok(UpgradeOutcome {
                    action: UpgradeDecision::Upgrade,
                    redirect_url: None,
                })
            }
        }
    }

    /// Request cancellation at period end.
    pub async fn cancel(&self, account_id: Uuid) -> BillingResult<()> {
        self.set_cancel_flag(account_id, true).await
    }

    /// Clear a pending cancellation.
    pub async fn reactivate(&self, account_id: Uuid) -> BillingResult<()> {
        self.set_cancel_flag(account_id, false).await
    }

    async fn set_cancel_flag(&self, account_id: Uuid, cancel: bool) -> BillingResult<()> {
        let _guard = self.begin(account_id)?;

        let account = self.repo.account_billing(account_id).await?;
        let sub_id = account
            .subscription
            .provider_subscription_id
            .as_deref()
            .ok_or(BillingError::NoProviderSubscription)?;

        let authoritative = self
            .call_provider(self.provider.set_cancel_at_period_end(sub_id, cancel))
            .await?;

        self.repo
            .overwrite_from_provider(account_id, &authoritative)
            .await?;

        tracing::info!(
            account_id = %account_id,
            cancel_at_period_end = cancel,
            "Cancellation flag updated"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CheckoutRedirect, ProviderSubscription};
    use crate::store::AccountBilling;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::Duration as TimeDuration;

    /// In-memory repo mirroring the store's semantics
    #[derive(Clone, Default)]
    struct MemoryRepo {
        accounts: Arc<Mutex<HashMap<Uuid, AccountBilling>>>,
    }

    impl MemoryRepo {
        fn insert(&self, account: AccountBilling) {
            self.accounts
                .lock()
                .unwrap()
                .insert(account.account_id, account);
        }

        fn subscription(&self, account_id: Uuid) -> Subscription {
            self.accounts.lock().unwrap()[&account_id].subscription.clone()
        }
    }

    impl SubscriptionRepo for MemoryRepo {
        async fn account_billing(&self, account_id: Uuid) -> BillingResult<AccountBilling> {
            self.accounts
                .lock()
                .unwrap()
                .get(&account_id)
                .cloned()
                .ok_or(BillingError::AccountNotFound(account_id))
        }

        async fn overwrite_from_provider(
            &self,
            account_id: Uuid,
            sub: &ProviderSubscription,
        ) -> BillingResult<()> {
            let mut accounts = self.accounts.lock().unwrap();
            let account = accounts
                .get_mut(&account_id)
                .ok_or(BillingError::AccountNotFound(account_id))?;
            account.subscription = Subscription {
                plan_id: Some(sub.plan_id.clone()),
                vm_count: sub.quantity as i32,
                expires_at: sub.expires_at,
                cancel_at_period_end: sub.cancel_at_period_end,
                provider_subscription_id: Some(sub.provider_subscription_id.clone()),
            };
            Ok(())
        }
    }

    /// Mock provider with a configurable response delay
    struct MockProvider {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new() -> Self {
            Self::with_delay(Duration::from_millis(0))
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl BillingProvider for MockProvider {
        async fn create_checkout(
            &self,
            _account_id: Uuid,
            _plan_id: &str,
            _quantity: i64,
        ) -> BillingResult<CheckoutRedirect> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(CheckoutRedirect {
                url: "https://checkout.example/session".to_string(),
            })
        }

        async fn update_subscription(
            &self,
            provider_subscription_id: &str,
            plan_id: &str,
            quantity: i64,
        ) -> BillingResult<ProviderSubscription> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ProviderSubscription {
                provider_subscription_id: provider_subscription_id.to_string(),
                plan_id: plan_id.to_string(),
                quantity,
                expires_at: Some(OffsetDateTime::now_utc() + TimeDuration::days(30)),
                cancel_at_period_end: false,
            })
        }

        async fn set_cancel_at_period_end(
            &self,
            provider_subscription_id: &str,
            cancel: bool,
        ) -> BillingResult<ProviderSubscription> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ProviderSubscription {
                provider_subscription_id: provider_subscription_id.to_string(),
                plan_id: "hour_booster".to_string(),
                quantity: 1,
                expires_at: Some(OffsetDateTime::now_utc() + TimeDuration::days(30)),
                cancel_at_period_end: cancel,
            })
        }
    }

    fn account(subscription: Subscription) -> AccountBilling {
        AccountBilling {
            account_id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            is_admin: false,
            stripe_customer_id: Some("cus_test".to_string()),
            subscription,
        }
    }

    fn active_subscription() -> Subscription {
        Subscription {
            plan_id: Some("hour_booster".to_string()),
            vm_count: 1,
            expires_at: Some(OffsetDateTime::now_utc() + TimeDuration::days(14)),
            cancel_at_period_end: false,
            provider_subscription_id: Some("sub_live".to_string()),
        }
    }

    fn orchestrator(
        provider: Arc<MockProvider>,
        repo: MemoryRepo,
    ) -> UpgradeOrchestrator<MockProvider, MemoryRepo> {
        UpgradeOrchestrator::new(Arc::new(PlanCatalog::new()), provider, repo)
    }

    #[test]
    fn decide_routes_fresh_accounts_to_checkout() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            decide(&Subscription::empty(), now),
            UpgradeDecision::NewSubscription
        );
    }

    #[test]
    fn decide_routes_expired_to_checkout_even_with_provider_ref() {
        let now = OffsetDateTime::now_utc();
        let mut sub = active_subscription();
        sub.expires_at = Some(now - TimeDuration::days(1));
        assert_eq!(decide(&sub, now), UpgradeDecision::NewSubscription);
    }

    #[test]
    fn decide_routes_active_and_cancelling_to_upgrade() {
        let now = OffsetDateTime::now_utc();
        let sub = active_subscription();
        assert_eq!(decide(&sub, now), UpgradeDecision::Upgrade);

        let mut cancelling = active_subscription();
        cancelling.cancel_at_period_end = true;
        assert_eq!(decide(&cancelling, now), UpgradeDecision::Upgrade);
    }

    #[test]
    fn decide_ignores_state_without_provider_ref() {
        // Plan granted by an admin with no billing relationship: checkout
        let now = OffsetDateTime::now_utc();
        let mut sub = active_subscription();
        sub.provider_subscription_id = None;
        assert_eq!(decide(&sub, now), UpgradeDecision::NewSubscription);
    }

    #[tokio::test]
    async fn fresh_account_gets_checkout_redirect() {
        let repo = MemoryRepo::default();
        let acct = account(Subscription::empty());
        let account_id = acct.account_id;
        repo.insert(acct);

        let orch = orchestrator(Arc::new(MockProvider::new()), repo);
        let outcome = orch
            .subscribe_or_upgrade(account_id, "hour_booster", 2)
            .await
            .unwrap();

        assert_eq!(outcome.action, UpgradeDecision::NewSubscription);
        assert!(outcome.redirect_url.is_some());
    }

    #[tokio::test]
    async fn active_account_upgrades_in_place_and_record_follows_provider() {
        let repo = MemoryRepo::default();
        let acct = account(active_subscription());
        let account_id = acct.account_id;
        repo.insert(acct);

        let orch = orchestrator(Arc::new(MockProvider::new()), repo.clone());
        let outcome = orch
            .subscribe_or_upgrade(account_id, "premium", 5)
            .await
            .unwrap();

        assert_eq!(outcome.action, UpgradeDecision::Upgrade);
        assert!(outcome.redirect_url.is_none());

        let stored = repo.subscription(account_id);
        assert_eq!(stored.plan_id.as_deref(), Some("premium"));
        assert_eq!(stored.vm_count, 5);
    }

    #[tokio::test]
    async fn invalid_quantity_never_reaches_the_provider() {
        let repo = MemoryRepo::default();
        let acct = account(active_subscription());
        let account_id = acct.account_id;
        repo.insert(acct);

        let provider = Arc::new(MockProvider::new());
        let orch = orchestrator(Arc::clone(&provider), repo);

        let err = orch
            .subscribe_or_upgrade(account_id, "hour_booster", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidQuantity(_)));

        let err = orch
            .subscribe_or_upgrade(account_id, "hour_booster", 21)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotQuotable { .. }));

        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_for_one_account_are_serialized() {
        // Exactly one request wins, the other gets
        // AlreadyInProgress instead of racing the provider
        let repo = MemoryRepo::default();
        let acct = account(active_subscription());
        let account_id = acct.account_id;
        repo.insert(acct);

        let provider = Arc::new(MockProvider::with_delay(Duration::from_millis(100)));
        let orch = Arc::new(orchestrator(Arc::clone(&provider), repo));

        let a = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.subscribe_or_upgrade(account_id, "premium", 2).await })
        };
        let b = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move {
                // Let the first request claim the slot
                tokio::time::sleep(Duration::from_millis(20)).await;
                orch.subscribe_or_upgrade(account_id, "premium", 2).await
            })
        };

        let first = a.await.unwrap();
        let second = b.await.unwrap();

        let outcome = first.unwrap();
        assert_eq!(outcome.action, UpgradeDecision::Upgrade);
        assert!(matches!(
            second.unwrap_err(),
            BillingError::AlreadyInProgress
        ));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn cancel_shares_the_mutation_slot_with_upgrades() {
        // One slot per account covers every mutating flow: a cancel arriving
        // while an upgrade is still talking to the provider is rejected
        let repo = MemoryRepo::default();
        let acct = account(active_subscription());
        let account_id = acct.account_id;
        repo.insert(acct);

        let provider = Arc::new(MockProvider::with_delay(Duration::from_millis(100)));
        let orch = Arc::new(orchestrator(Arc::clone(&provider), repo.clone()));

        let upgrade = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.subscribe_or_upgrade(account_id, "premium", 2).await })
        };

        // Let the upgrade claim the slot first
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = orch.cancel(account_id).await.unwrap_err();
        assert!(matches!(err, BillingError::AlreadyInProgress));

        upgrade.await.unwrap().unwrap();
        assert_eq!(provider.call_count(), 1);

        // With the slot released, the cancel goes through
        orch.cancel(account_id).await.unwrap();
        assert!(repo.subscription(account_id).cancel_at_period_end);
    }

    #[tokio::test]
    async fn slot_is_released_after_completion() {
        let repo = MemoryRepo::default();
        let acct = account(active_subscription());
        let account_id = acct.account_id;
        repo.insert(acct);

        let orch = orchestrator(Arc::new(MockProvider::new()), repo);

        orch.subscribe_or_upgrade(account_id, "premium", 2)
            .await
            .unwrap();
        // The second sequential request must not see AlreadyInProgress
        orch.subscribe_or_upgrade(account_id, "standard", 3)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn distinct_accounts_do_not_block_each_other() {
        let repo = MemoryRepo::default();
        let acct_a = account(active_subscription());
        let acct_b = account(active_subscription());
        let (id_a, id_b) = (acct_a.account_id, acct_b.account_id);
        repo.insert(acct_a);
        repo.insert(acct_b);

        let provider = Arc::new(MockProvider::with_delay(Duration::from_millis(50)));
        let orch = Arc::new(orchestrator(provider, repo));

        let a = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.subscribe_or_upgrade(id_a, "premium", 1).await })
        };
        let b = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.subscribe_or_upgrade(id_b, "premium", 1).await })
        };

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn provider_timeout_leaves_record_unchanged() {
        let repo = MemoryRepo::default();
        let acct = account(active_subscription());
        let account_id = acct.account_id;
        let before = acct.subscription.clone();
        repo.insert(acct);

        let provider = Arc::new(MockProvider::with_delay(Duration::from_secs(5)));
        let orch = orchestrator(provider, repo.clone())
            .with_provider_timeout(Duration::from_millis(10));

        let err = orch
            .subscribe_or_upgrade(account_id, "premium", 2)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::ProviderUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(repo.subscription(account_id), before);
    }

    #[tokio::test]
    async fn slot_is_released_after_timeout() {
        let repo = MemoryRepo::default();
        let acct = account(active_subscription());
        let account_id = acct.account_id;
        repo.insert(acct);

        let provider = Arc::new(MockProvider::with_delay(Duration::from_secs(5)));
        let orch = orchestrator(provider, repo.clone())
            .with_provider_timeout(Duration::from_millis(10));

        let err = orch
            .subscribe_or_upgrade(account_id, "premium", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ProviderUnavailable(_)));

        // The failed attempt must not leave the account wedged
        let err = orch
            .subscribe_or_upgrade(account_id, "premium", 2)
            .await
            .unwrap_err();
        assert!(
            matches!(err, BillingError::ProviderUnavailable(_)),
            "expected a fresh provider attempt, got {err:?}"
        );
    }

    #[tokio::test]
    async fn cancel_requires_provider_backing() {
        let repo = MemoryRepo::default();
        let mut sub = active_subscription();
        sub.provider_subscription_id = None;
        let acct = account(sub);
        let account_id = acct.account_id;
        repo.insert(acct);

        let provider = Arc::new(MockProvider::new());
        let orch = orchestrator(Arc::clone(&provider), repo);

        let err = orch.cancel(account_id).await.unwrap_err();
        assert!(matches!(err, BillingError::NoProviderSubscription));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn cancel_and_reactivate_round_trip() {
        let repo = MemoryRepo::default();
        let acct = account(active_subscription());
        let account_id = acct.account_id;
        repo.insert(acct);

        let orch = orchestrator(Arc::new(MockProvider::new()), repo.clone());

        orch.cancel(account_id).await.unwrap();
        assert!(repo.subscription(account_id).cancel_at_period_end);

        orch.reactivate(account_id).await.unwrap();
        assert!(!repo.subscription(account_id).cancel_at_period_end);
    }
}
