pub mod peripherals;
