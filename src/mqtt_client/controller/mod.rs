pub mod device_commander;
pub mod property_updater;
