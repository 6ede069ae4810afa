//! Layered application configuration.

mod sdrm_config;

pub use sdrm_config::{
    ApplicationConfig, ComponentDefinition, ConfigError, KeymasterConfig, PipelineConfig,
    SdrmConfig, StartupRequest, DEFAULT_CONFIG_PATH,
};
