//! Stockval Common - configuration, errors and logging shared by the stockval crates.
//!
//! This crate provides:
//! - `conf.yaml` loading with environment overrides
//! - Configuration validation
//! - Error types and context helpers
//! - Logging setup (console plus rotating file output)

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    AlphaVantageConfig, DataSourcesConfig, EnvironmentState, FmpConfig, LogLevel, LoggingConfig,
    ModelConfig, ReportingPeriod, RotationPolicy, Settings, TelegramConfig, YahooConfig,
};
pub use error::{Error, Result};
pub use logging::{init_logging, LoggingGuard};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{EnvironmentState, ModelConfig, ReportingPeriod, Settings};
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
