pub mod traits;
pub mod device;
