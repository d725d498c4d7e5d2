pub mod connection_state_bo;
pub mod device_config_bo;
pub mod provisioning_bo;
