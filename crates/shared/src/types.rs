//! VM status and lifecycle operation enums
//!
//! Status strings arrive from the hypervisor; anything unrecognised maps to
//! `Unknown` rather than failing, so a hypervisor upgrade can never take the
//! dashboard down.

use serde::{Deserialize, Serialize};

/// Operational status of a VM as last reported by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Stopped,
    Paused,
    /// Hypervisor unreachable or reported an unrecognised status
    Unknown,
}

impl VmStatus {
    /// Parse a hypervisor status string, mapping anything unrecognised to `Unknown`
    pub fn from_hypervisor(raw: &str) -> Self {
        match raw {
            "running" => VmStatus::Running,
            "stopped" => VmStatus::Stopped,
            "paused" => VmStatus::Paused,
            _ => VmStatus::Unknown,
        }
    }

    /// Whether the VM currently holds host resources (running or paused)
    pub fn holds_resources(&self) -> bool {
        matches!(self, VmStatus::Running | VmStatus::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Running => "running",
            VmStatus::Stopped => "stopped",
            VmStatus::Paused => "paused",
            VmStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// VM lifecycle operations a user can request from the dashboard.
///
/// `Stop` is a hard power-off; `Shutdown` asks the guest OS to halt cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmOperation {
    Start,
    Stop,
    Shutdown,
    Reboot,
}

impl VmOperation {
    /// All operations, in the order the dashboard renders them
    pub const ALL: [VmOperation; 4] = [
        VmOperation::Start,
        VmOperation::Stop,
        VmOperation::Shutdown,
        VmOperation::Reboot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VmOperation::Start => "start",
            VmOperation::Stop => "stop",
            VmOperation::Shutdown => "shutdown",
            VmOperation::Reboot => "reboot",
        }
    }
}

impl std::fmt::Display for VmOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
