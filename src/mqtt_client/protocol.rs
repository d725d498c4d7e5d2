//! broker topic protocol
//! builds outbound topics and connect identities, classifies inbound topics into a category
//! plus the ordered key/value tokens they carry

use crate::common::error::{DeviceClientError, ErrorCode};
use crate::entity::bo::device_config_bo::{DeploymentMode, DeviceConfig};

pub const TWIN_RESPONSE_SUBSCRIPTION: &str = "$iothub/twin/res/#";
pub const DESIRED_PATCH_SUBSCRIPTION: &str = "$iothub/twin/PATCH/properties/desired/#";
pub const METHOD_SUBSCRIPTION: &str = "$iothub/methods/POST/#";
pub const PROVISIONING_SUBSCRIPTION: &str = "$dps/registrations/res/#";

const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
const DESIRED_PATCH_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
const METHOD_PREFIX: &str = "$iothub/methods/POST/";
const PROVISIONING_RESPONSE_PREFIX: &str = "$dps/registrations/res/";

const PROVISIONING_API_VERSION: &str = "2021-06-01";
const HUB_API_VERSION: &str = "2021-04-12";

pub const STATUS_SUCCESS: u16 = 200;
// writable property value chosen by the device
pub const STATUS_SET_BY_DEVICE: u16 = 203;
// twin patch accepted
pub const STATUS_CLOUD_SUCCESS: u16 = 204;
pub const STATUS_BAD_REQUEST: u16 = 400;
// request rate exceeded, retry after the hint
pub const STATUS_THROTTLED: u16 = 429;
pub const STATUS_EXCEPTION: u16 = 500;

pub const STATUS_TOKEN: &str = "status";
pub const METHOD_TOKEN: &str = "method";
pub const REQUEST_ID_TOKEN: &str = "$rid";
pub const VERSION_TOKEN: &str = "$version";
pub const RETRY_AFTER_TOKEN: &str = "retry-after";

pub fn reported_properties_topic(request_id: u32) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={request_id}")
}

pub fn twin_get_topic(request_id: u32) -> String {
    format!("$iothub/twin/GET/?$rid={request_id}")
}

pub fn telemetry_topic(device_id: &str) -> String {
    format!("devices/{device_id}/messages/events/")
}

pub fn method_response_topic(status: u16, request_id: &str) -> String {
    format!("$iothub/methods/res/{status}/?$rid={request_id}")
}

pub fn registration_topic(request_id: u32) -> String {
    format!("$dps/registrations/PUT/iotdps-register/?$rid={request_id}")
}

pub fn operation_status_topic(request_id: u32, operation_id: &str) -> String {
    format!("$dps/registrations/GET/iotdps-get-operationstatus/?$rid={request_id}&operationId={operation_id}")
}

pub fn provisioning_username(scope_id: &str, device_id: &str, model_id: &str) -> String {
    format!("{scope_id}/registrations/{device_id}/api-version={PROVISIONING_API_VERSION}&model-id={model_id}")
}

pub fn hub_username(hub_address: &str, device_id: &str, model_id: &str) -> String {
    format!("{hub_address}/{device_id}/?api-version={HUB_API_VERSION}&model-id={model_id}")
}

/// broker endpoint plus the identity presented to it
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerTarget {
    pub address: String,
    pub client_id: String,
    pub username: Option<String>,
}

impl BrokerTarget {
    /// provisioning broker of a provisioning-mediated device
    pub fn provisioning(config: &DeviceConfig) -> Result<Self, DeviceClientError> {
        match &config.mode {
            DeploymentMode::ProvisioningMediated { scope_id, dps_address, model_id } => Ok(BrokerTarget {
                address: dps_address.clone(),
                client_id: config.device_id.clone(),
                username: Some(provisioning_username(scope_id, &config.device_id, model_id)),
            }),
            DeploymentMode::HubDirect { .. } => Err(DeviceClientError::new(
                ErrorCode::ConfigMalformed,
                "hub-direct configuration has no provisioning broker",
            )),
        }
    }

    /// operational broker, the assigned hub or the fixed endpoint
    pub fn operational(config: &DeviceConfig, hub_address: Option<&str>) -> Result<Self, DeviceClientError> {
        match &config.mode {
            DeploymentMode::ProvisioningMediated { model_id, .. } => {
                let hub = hub_address.ok_or_else(|| {
                    DeviceClientError::new(ErrorCode::ConnectFailure, "device is not provisioned, no hub address")
                })?;
                Ok(BrokerTarget {
                    address: hub.to_string(),
                    client_id: config.device_id.clone(),
                    username: Some(hub_username(hub, &config.device_id, model_id)),
                })
            }
            DeploymentMode::HubDirect { endpoint } => Ok(BrokerTarget {
                address: endpoint.clone(),
                client_id: config.device_id.clone(),
                username: None,
            }),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TopicCategory {
    TwinResponse,
    TwinDesiredPatch,
    DirectMethod,
    ProvisioningResponse,
}

/// classified inbound topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundTopic {
    pub category: TopicCategory,
    pub tokens: Vec<(String, String)>,
}

// checked in this order, first match wins
const PATTERNS: [(TopicCategory, &str, Option<&str>); 4] = [
    (TopicCategory::TwinResponse, TWIN_RESPONSE_PREFIX, Some(STATUS_TOKEN)),
    (TopicCategory::TwinDesiredPatch, DESIRED_PATCH_PREFIX, None),
    (TopicCategory::DirectMethod, METHOD_PREFIX, Some(METHOD_TOKEN)),
    (TopicCategory::ProvisioningResponse, PROVISIONING_RESPONSE_PREFIX, Some(STATUS_TOKEN)),
];

/// classify a topic, `None` for topics of no known category
pub fn classify(topic: &str) -> Option<InboundTopic> {
    PATTERNS.iter().find_map(|(category, prefix, path_key)| {
        let rest = topic.strip_prefix(prefix)?;
        Some(InboundTopic { category: *category, tokens: tokenize(rest, *path_key) })
    })
}

/// `200/?$rid=1&$version=3` becomes `[(status, 200), ($rid, 1), ($version, 3)]`
fn tokenize(rest: &str, path_key: Option<&str>) -> Vec<(String, String)> {
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    let mut tokens = Vec::new();

    if let Some(key) = path_key {
        if let Some(segment) = path.split('/').find(|segment| !segment.is_empty()) {
            tokens.push((key.to_string(), segment.to_string()));
        }
    }

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        tokens.push((key.to_string(), value.to_string()));
    }
    tokens
}

impl InboundTopic {
    pub fn token(&self, key: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn status(&self) -> Option<u16> {
        self.token(STATUS_TOKEN)?.parse().ok()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.token(REQUEST_ID_TOKEN)
    }

    pub fn retry_after(&self) -> Option<u64> {
        self.token(RETRY_AFTER_TOKEN)?.parse().ok()
    }

    pub fn version(&self) -> Option<i64> {
        self.token(VERSION_TOKEN)?.parse().ok()
    }

    pub fn method_name(&self) -> Option<&str> {
        self.token(METHOD_TOKEN)
    }
}
