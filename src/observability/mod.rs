//! Logging setup for hosts embedding the session

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

pub use logging::mqtt_span;
