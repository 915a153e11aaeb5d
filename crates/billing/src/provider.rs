//! Billing provider interface and Stripe implementation
//!
//! The provider's response is the sole source of truth for plan, quantity,
//! expiry and cancel flag once a subscription is provider-backed. The
//! orchestrator writes `ProviderSubscription` back into the local record
//! verbatim; requested values from the caller are only ever a proposal.

use std::collections::HashMap;
use std::future::Future;

use stripe::{
    CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems, SubscriptionId,
    UpdateSubscription, UpdateSubscriptionItems,
};
// Proration behavior lives in the subscription module (not subscription_item)
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Authoritative subscription fields as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubscription {
    pub provider_subscription_id: String,
    pub plan_id: String,
    pub quantity: i64,
    pub expires_at: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// A hosted checkout the user must be redirected to.
#[derive(Debug, Clone)]
pub struct CheckoutRedirect {
    pub url: String,
}

/// The external subscription/payment gateway.
///
/// Checkout creation, plan/quantity swaps and cancellation flags go through
/// here; proration math is the provider's concern, never computed locally.
pub trait BillingProvider: Send + Sync + 'static {
    /// Create a hosted checkout session for a brand-new subscription
    fn create_checkout(
        &self,
        account_id: Uuid,
        plan_id: &str,
        quantity: i64,
    ) -> impl Future<Output = BillingResult<CheckoutRedirect>> + Send;

    /// Swap plan/quantity on an existing subscription, effective immediately
    fn update_subscription(
        &self,
        provider_subscription_id: &str,
        plan_id: &str,
        quantity: i64,
    ) -> impl Future<Output = BillingResult<ProviderSubscription>> + Send;

    /// Set or clear the cancel-at-period-end flag
    fn set_cancel_at_period_end(
        &self,
        provider_subscription_id: &str,
        cancel: bool,
    ) -> impl Future<Output = BillingResult<ProviderSubscription>> + Send;
}

/// Stripe configuration: API key, redirect URLs and the plan -> price mapping.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    /// `(plan_id, stripe_price_id)` pairs
    prices: Vec<(String, String)>,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = require_env("STRIPE_SECRET_KEY")?;
        let checkout_success_url = std::env::var("CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|_| "http://localhost:3000/billing/success".to_string());
        let checkout_cancel_url = std::env::var("CHECKOUT_CANCEL_URL")
            .unwrap_or_else(|_| "http://localhost:3000/billing/cancelled".to_string());

        let mut prices = Vec::new();
        for (plan_id, var) in [
            ("hour_booster", "STRIPE_PRICE_HOUR_BOOSTER"),
            ("standard", "STRIPE_PRICE_STANDARD"),
            ("premium", "STRIPE_PRICE_PREMIUM"),
        ] {
            if let Ok(price_id) = std::env::var(var) {
                prices.push((plan_id.to_string(), price_id));
            } else {
                tracing::warn!(plan_id, "No Stripe price configured ({var}) - plan not purchasable");
            }
        }

        Ok(Self {
            secret_key,
            checkout_success_url,
            checkout_cancel_url,
            prices,
        })
    }

    pub fn price_id_for_plan(&self, plan_id: &str) -> Option<&str> {
        self.prices
            .iter()
            .find(|(plan, _)| plan == plan_id)
            .map(|(_, price)| price.as_str())
    }

    pub fn plan_for_price_id(&self, price_id: &str) -> Option<&str> {
        self.prices
            .iter()
            .find(|(_, price)| price == price_id)
            .map(|(plan, _)| plan.as_str())
    }
}

fn require_env(name: &str) -> BillingResult<String> {
    std::env::var(name).map_err(|_| BillingError::Config(format!("{name} not set")))
}

/// Stripe-backed [`BillingProvider`].
#[derive(Clone)]
pub struct StripeBilling {
    client: stripe::Client,
    config: StripeConfig,
}

impl StripeBilling {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self { client, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn price_for(&self, plan_id: &str) -> BillingResult<String> {
        self.config
            .price_id_for_plan(plan_id)
            .map(str::to_string)
            .ok_or_else(|| BillingError::Config(format!("no Stripe price for plan '{plan_id}'")))
    }

    /// Map a Stripe subscription object onto the authoritative record.
    ///
    /// The plan id comes from subscription metadata (we set it on every
    /// create/update); the price-id mapping is the fallback for
    /// subscriptions created before metadata was written.
    fn map_subscription(&self, sub: &stripe::Subscription) -> BillingResult<ProviderSubscription> {
        let item = sub.items.data.first();

        let plan_id = sub
            .metadata
            .get("plan_id")
            .cloned()
            .or_else(|| {
                item.and_then(|i| i.price.as_ref())
                    .and_then(|p| self.config.plan_for_price_id(p.id.as_str()))
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                BillingError::Provider(format!("subscription {} has no resolvable plan", sub.id))
            })?;

        let quantity = item.and_then(|i| i.quantity).unwrap_or(1) as i64;

        let expires_at = OffsetDateTime::from_unix_timestamp(sub.current_period_end)
            .map(Some)
            .map_err(|_| {
                BillingError::Provider(format!(
                    "subscription {} has invalid period end {}",
                    sub.id, sub.current_period_end
                ))
            })?;

        Ok(ProviderSubscription {
            provider_subscription_id: sub.id.to_string(),
            plan_id,
            quantity,
            expires_at,
            cancel_at_period_end: sub.cancel_at_period_end,
        })
    }

    fn parse_subscription_id(raw: &str) -> BillingResult<SubscriptionId> {
        raw.parse::<SubscriptionId>()
            .map_err(|e| BillingError::Provider(format!("invalid subscription id '{raw}': {e}")))
    }
}

impl BillingProvider for StripeBilling {
    async fn create_checkout(
        &self,
        account_id: Uuid,
        plan_id: &str,
        quantity: i64,
    ) -> BillingResult<CheckoutRedirect> {
        let price_id = self.price_for(plan_id)?;
        let account = account_id.to_string();

        let mut metadata = HashMap::new();
        metadata.insert("account_id".to_string(), account.clone());
        metadata.insert("plan_id".to_string(), plan_id.to_string());

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(&self.config.checkout_success_url);
        params.cancel_url = Some(&self.config.checkout_cancel_url);
        params.client_reference_id = Some(&account);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(quantity as u64),
            ..Default::default()
        }]);
        params.metadata = Some(metadata);

        let session = stripe::CheckoutSession::create(&self.client, params).await?;

        let url = session.url.ok_or_else(|| {
            BillingError::Provider("checkout session has no redirect URL".to_string())
        })?;

        tracing::info!(
            account_id = %account_id,
            plan_id,
            quantity,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(CheckoutRedirect { url })
    }

    async fn update_subscription(
        &self,
        provider_subscription_id: &str,
        plan_id: &str,
        quantity: i64,
    ) -> BillingResult<ProviderSubscription> {
        let sub_id = Self::parse_subscription_id(provider_subscription_id)?;
        let price_id = self.price_for(plan_id)?;

        // The item id is needed to swap the price in place
        let current = stripe::Subscription::retrieve(&self.client, &sub_id, &[]).await?;
        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| BillingError::Provider("no subscription items found".to_string()))?;

        let mut metadata = HashMap::new();
        metadata.insert("plan_id".to_string(), plan_id.to_string());

        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id),
                price: Some(price_id),
                quantity: Some(quantity as u64),
                ..Default::default()
            }]),
            metadata: Some(metadata),
            // Charge the prorated difference immediately; the proration math
            // is Stripe's, not ours
            proration_behavior: Some(SubscriptionProrationBehavior::CreateProrations),
            ..Default::default()
        };

        let subscription = stripe::Subscription::update(&self.client, &sub_id, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            plan_id,
            quantity,
            "Swapped subscription plan/quantity"
        );

        self.map_subscription(&subscription)
    }

    async fn set_cancel_at_period_end(
        &self,
        provider_subscription_id: &str,
        cancel: bool,
    ) -> BillingResult<ProviderSubscription> {
        let sub_id = Self::parse_subscription_id(provider_subscription_id)?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(cancel),
            ..Default::default()
        };

        let subscription = stripe::Subscription::update(&self.client, &sub_id, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            cancel_at_period_end = cancel,
            "Updated cancellation flag"
        );

        self.map_subscription(&subscription)
    }
}
