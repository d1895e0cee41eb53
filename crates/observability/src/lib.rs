//! Process-wide tracing setup shared by the binaries.

pub mod logging;

pub use logging::{LogFormat, LoggingConfig, init, init_with};
