//! Application state

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use slicevm_billing::{
    PlanCatalog, StripeBilling, SubscriptionStore, UpgradeOrchestrator,
};

use crate::config::Config;
use crate::hypervisor::HypervisorClient;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub catalog: Arc<PlanCatalog>,
    pub store: SubscriptionStore,
    pub orchestrator: Arc<UpgradeOrchestrator<StripeBilling, SubscriptionStore>>,
    pub hypervisor: Arc<HypervisorClient>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let catalog = Arc::new(PlanCatalog::new());
        let store = SubscriptionStore::new(pool);

        let billing = StripeBilling::from_env()?;
        tracing::info!("Stripe billing provider initialized");

        let orchestrator = Arc::new(
            UpgradeOrchestrator::new(Arc::clone(&catalog), Arc::new(billing), store.clone())
                .with_provider_timeout(Duration::from_secs(config.billing_timeout_secs)),
        );

        let hypervisor = Arc::new(HypervisorClient::new(
            config.hypervisor_api_url.clone(),
            config.hypervisor_api_token.clone(),
            config.hypervisor_node.clone(),
        )?);
        tracing::info!(node = %config.hypervisor_node, "Hypervisor client initialized");

        Ok(Self {
            config,
            catalog,
            store,
            orchestrator,
            hypervisor,
        })
    }
}
