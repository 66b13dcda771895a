//! CLI command modules.

pub mod http;
pub mod peripherals;
pub mod status;
