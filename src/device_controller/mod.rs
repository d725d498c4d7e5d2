//! device lifecycle
//! - credential bootstrap and configuration loading at startup
//! - provisioning and hub connection
//! - telemetry, property reports and inbound message handling

pub mod device_manager;
