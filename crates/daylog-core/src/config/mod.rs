//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod logging;
pub mod processing;
pub mod scheduler;

use serde::{Deserialize, Serialize};

pub use self::logging::LoggingConfig;
pub use self::processing::ProcessingConfig;
pub use self::scheduler::SchedulerConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Job scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Day queue processing settings.
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `DAYLOG__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("DAYLOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot drive a scheduler.
    pub fn validate(&self) -> Result<(), AppError> {
        self.scheduler.validate()?;
        self.processing.validate()?;
        Ok(())
    }
}
