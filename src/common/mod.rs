pub mod setting;
pub mod logger;
pub mod error;
pub mod storage;
pub mod transport;
pub mod clock;
pub mod mqtt;
