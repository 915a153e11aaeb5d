//! Environment configuration

use anyhow::Context;

/// API server configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Proxmox-compatible hypervisor API, e.g. https://pve.example.com:8006
    pub hypervisor_api_url: String,
    /// API token in `user@realm!tokenid=secret` form
    pub hypervisor_api_token: String,
    /// Node the rented VMs live on
    pub hypervisor_node: String,
    /// Upper bound on a single billing provider call
    pub billing_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            hypervisor_api_url: std::env::var("HYPERVISOR_API_URL")
                .context("HYPERVISOR_API_URL must be set")?,
            hypervisor_api_token: std::env::var("HYPERVISOR_API_TOKEN")
                .context("HYPERVISOR_API_TOKEN must be set")?,
            hypervisor_node: std::env::var("HYPERVISOR_NODE")
                .unwrap_or_else(|_| "pve".to_string()),
            billing_timeout_secs: std::env::var("BILLING_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        })
    }
}
