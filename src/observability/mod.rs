//! Observability: structured logging setup and span macros

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

pub use logging::{device_span, lifecycle_span};
