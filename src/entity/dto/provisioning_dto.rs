//! provisioning broker data transmission objects

use serde_derive::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningPayloadDto {
    pub model_id: String,
}

/// registration request body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequestDto {
    pub registration_id: String,
    pub payload: ProvisioningPayloadDto,
}

/// fields of a registration or operation status reply the state machine needs
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningResponseDto {
    pub operation_id: Option<String>,
    pub status: String,
    // only present once the registration is assigned
    pub assigned_hub: Option<String>,
}
