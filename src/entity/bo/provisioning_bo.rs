//! provisioning session Bo

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningPhase {
    Idle,
    RegisterSent,
    Polling,
    Assigned,
    Failed,
}

/// result of one register and poll flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    Assigned { hub_address: String },
    Failed,
    // caller deadline passed before a terminal status arrived
    TimedOut,
    Cancelled,
}

/// state of the single active provisioning flow
#[derive(Debug, Clone)]
pub struct ProvisioningSession {
    pub phase: ProvisioningPhase,
    pub operation_id: Option<String>,
    // server suggested delay from the latest reply topic
    pub retry_after_secs: Option<u64>,
    pub last_request_id: u32,
}

impl ProvisioningSession {
    pub fn new() -> Self {
        ProvisioningSession {
            phase: ProvisioningPhase::Idle,
            operation_id: None,
            retry_after_secs: None,
            last_request_id: 0,
        }
    }

    /// wait before the next status check, hints outside (1, 10) seconds fall back to 5 seconds
    pub fn poll_interval(&self) -> Duration {
        match self.retry_after_secs {
            Some(secs) if secs > 1 && secs < 10 => Duration::from_secs(secs),
            _ => Duration::from_secs(5),
        }
    }
}
