//! device configuration Bo

/// version constant stored as the first field of the configuration record
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigVersion {
    // register through the provisioning broker, then talk to the assigned hub
    ProvisioningMediated = 1,
    // connect straight to a fixed broker endpoint
    HubDirect = 2,
}

impl ConfigVersion {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(ConfigVersion::ProvisioningMediated),
            2 => Some(ConfigVersion::HubDirect),
            _ => None,
        }
    }
}

/// deployment specific part of the configuration, exactly one variant per record
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentMode {
    ProvisioningMediated {
        scope_id: String,
        dps_address: String,
        model_id: String,
    },
    HubDirect {
        endpoint: String,
    },
}

/// wifi association and time sync parameters handed to the connectivity module
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSettings {
    pub ntp_server: String,
    pub timezone: String,
    pub wifi_ssid: String,
    pub wifi_key: String,
    pub wifi_security_type: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub device_id: String,
    pub mode: DeploymentMode,
    pub network: NetworkSettings,
}

impl DeviceConfig {
    pub fn version(&self) -> ConfigVersion {
        match self.mode {
            DeploymentMode::ProvisioningMediated { .. } => ConfigVersion::ProvisioningMediated,
            DeploymentMode::HubDirect { .. } => ConfigVersion::HubDirect,
        }
    }

    pub fn model_id(&self) -> Option<&str> {
        match &self.mode {
            DeploymentMode::ProvisioningMediated { model_id, .. } => Some(model_id.as_str()),
            DeploymentMode::HubDirect { .. } => None,
        }
    }
}
