//! Hypervisor client
//!
//! Thin wrapper over a Proxmox-compatible HTTP API: per-VM status polling and
//! action dispatch. The authorization gate decides *whether* an action may be
//! dispatched; this client only decides how to deliver it.

use std::time::Duration;

use serde::Deserialize;
use slicevm_shared::{VmOperation, VmStatus};

#[derive(Debug, thiserror::Error)]
pub enum HypervisorError {
    #[error("hypervisor request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("hypervisor rejected {operation} for vm {vmid}: HTTP {status}")]
    Rejected {
        vmid: i64,
        operation: VmOperation,
        status: u16,
    },
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    data: StatusData,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: String,
}

/// Client for one Proxmox node.
#[derive(Clone)]
pub struct HypervisorClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    node: String,
}

impl HypervisorClient {
    pub fn new(
        base_url: String,
        api_token: String,
        node: String,
    ) -> Result<Self, HypervisorError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_token,
            node,
        })
    }

    fn vm_url(&self, vmid: i64, tail: &str) -> String {
        format!(
            "{}/api2/json/nodes/{}/qemu/{}/status/{}",
            self.base_url, self.node, vmid, tail
        )
    }

    /// Poll the current status of a VM.
    ///
    /// An unreachable hypervisor or unrecognised payload degrades to
    /// `Unknown` rather than failing the dashboard read; the gate then
    /// permits nothing for that VM.
    pub async fn vm_status(&self, vmid: i64) -> VmStatus {
        let result = self
            .http
            .get(self.vm_url(vmid, "current"))
            .header("Authorization", format!("PVEAPIToken={}", self.api_token))
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(vmid, error = %e, "Status poll failed - reporting unknown");
                return VmStatus::Unknown;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                vmid,
                status = response.status().as_u16(),
                "Status poll rejected - reporting unknown"
            );
            return VmStatus::Unknown;
        }

        match response.json::<StatusEnvelope>().await {
            Ok(envelope) => VmStatus::from_hypervisor(&envelope.data.status),
            Err(e) => {
                tracing::warn!(vmid, error = %e, "Unparseable status payload - reporting unknown");
                VmStatus::Unknown
            }
        }
    }

    /// Dispatch a lifecycle operation. Fire-and-forget from the caller's view;
    /// the hypervisor executes it asynchronously.
    pub async fn dispatch(&self, vmid: i64, operation: VmOperation) -> Result<(), HypervisorError> {
        let response = self
            .http
            .post(self.vm_url(vmid, operation.as_str()))
            .header("Authorization", format!("PVEAPIToken={}", self.api_token))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HypervisorError::Rejected {
                vmid,
                operation,
                status: response.status().as_u16(),
            });
        }

        tracing::info!(vmid, operation = %operation, "Dispatched VM action");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_builds_a_client_with_its_timeout() {
        let client = HypervisorClient::new(
            "https://pve.example.com:8006".to_string(),
            "user@pam!dashboard=secret".to_string(),
            "pve".to_string(),
        );
        assert!(client.is_ok());
    }

    #[test]
    fn vm_urls_follow_the_proxmox_layout() {
        let client = HypervisorClient::new(
            "https://pve.example.com:8006".to_string(),
            "token".to_string(),
            "pve".to_string(),
        )
        .unwrap();
        assert_eq!(
            client.vm_url(104, "current"),
            "https://pve.example.com:8006/api2/json/nodes/pve/qemu/104/status/current"
        );
        assert_eq!(
            client.vm_url(104, "shutdown"),
            "https://pve.example.com:8006/api2/json/nodes/pve/qemu/104/status/shutdown"
        );
    }
}
