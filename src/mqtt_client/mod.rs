pub mod client;
pub mod codec;
pub mod controller;
pub mod message_listener;
pub mod protocol;
pub mod provisioning;
