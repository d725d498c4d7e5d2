pub mod command_dto;
pub mod property_dto;
pub mod provisioning_dto;
pub mod telemetry_dto;
