//! Figment-based configuration for the SDR control application.
//!
//! Layers, lowest precedence first: built-in defaults, a TOML file, then
//! environment variables prefixed with `SDRM_` (nested keys separated by `__`,
//! e.g. `SDRM_PIPELINE__QUEUE_DEPTH=32`).
//!
//! ```toml
//! [application]
//! name = "sdrm"
//! log_level = "info"
//!
//! [keymaster]
//! command_namespace = "AIRSPYCMDS"
//!
//! [pipeline]
//! queue_depth = 10
//! publish_policy = "block"
//!
//! [[components]]
//! name = "airspy"
//! kind = "AirspyComponent"
//!
//! [[components]]
//! name = "fft"
//! kind = "FftComponent"
//! sinks = { input_data = "airspy.iq_data" }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::command::DEFAULT_NAMESPACE;
use crate::components::{output_source, INPUT_SINK, KNOWN_KINDS};
use crate::hardware::MockConfig;
use crate::pipeline::{PublishPolicy, ThreadTiming, DEFAULT_QUEUE_DEPTH};

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/sdrm.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Parsing or extraction failed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Values parsed but are inconsistent.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdrmConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Coordination store settings
    #[serde(default)]
    pub keymaster: KeymasterConfig,
    /// Data pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Simulated receiver settings
    #[serde(default)]
    pub simulator: MockConfig,
    /// Component instances, in start order of the data flow
    #[serde(default)]
    pub components: Vec<ComponentDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// System mode announced after bootstrap
    #[serde(default = "default_system_mode")]
    pub system_mode: String,
}

/// Coordination store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeymasterConfig {
    /// Namespace of command request/response keys
    #[serde(default = "default_namespace")]
    pub command_namespace: String,
    /// Requests written once every component is Ready
    #[serde(default)]
    pub startup_requests: Vec<StartupRequest>,
}

/// A command request issued during bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupRequest {
    /// Command name, e.g. `open_sn`
    pub command: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Queue depth of every connected sink
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Timeout of each blocking receive in milliseconds
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
    /// Bound on the wait for an acquisition thread to start
    #[serde(default = "default_start_timeout")]
    pub start_timeout_ms: u64,
    /// Bound on the wait for an acquisition thread to exit
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
    /// How long a blocking publish waits for queue space
    #[serde(default = "default_block_timeout")]
    pub block_timeout_ms: u64,
    /// Full-queue policy of processing stages
    #[serde(default)]
    pub publish_policy: PublishPolicy,
}

impl PipelineConfig {
    /// Thread timing derived from the millisecond settings.
    #[must_use]
    pub fn timing(&self) -> ThreadTiming {
        ThreadTiming {
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            start_timeout: Duration::from_millis(self.start_timeout_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }

    /// Wait bound of a blocking publish.
    #[must_use]
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            receive_timeout_ms: default_receive_timeout(),
            start_timeout_ms: default_start_timeout(),
            stop_timeout_ms: default_stop_timeout(),
            block_timeout_ms: default_block_timeout(),
            publish_policy: PublishPolicy::default(),
        }
    }
}

/// Component definition in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    /// Unique instance name; also the prefix of its data topics
    pub name: String,
    /// Factory kind (AirspyComponent, FftComponent, ConsoleDisplay)
    pub kind: String,
    /// Whether this component is instantiated
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sink name -> upstream topic
    #[serde(default)]
    pub sinks: BTreeMap<String, String>,
}

impl ComponentDefinition {
    /// Definition with no sinks.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            enabled: true,
            sinks: BTreeMap::new(),
        }
    }

    /// Adds a sink connection.
    #[must_use]
    pub fn with_sink(mut self, sink: impl Into<String>, topic: impl Into<String>) -> Self {
        self.sinks.insert(sink.into(), topic.into());
        self
    }
}

impl KeymasterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let ns = &self.command_namespace;
        if ns.is_empty() || ns.contains('.') {
            return Err(ConfigError::ValidationError(format!(
                "Invalid command_namespace '{ns}'. Must be a single non-empty key segment"
            )));
        }
        Ok(())
    }
}

impl Default for KeymasterConfig {
    fn default() -> Self {
        Self {
            command_namespace: default_namespace(),
            startup_requests: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_system_mode() -> String {
    "iq_monitor".to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_receive_timeout() -> u64 {
    1000
}

fn default_start_timeout() -> u64 {
    5000
}

fn default_stop_timeout() -> u64 {
    5000
}

fn default_block_timeout() -> u64 {
    1000
}

fn default_enabled() -> bool {
    true
}

impl Default for SdrmConfig {
    /// Receiver -> FFT -> console display, the `iq_monitor` topology.
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "sdrm".to_string(),
                log_level: default_log_level(),
                system_mode: default_system_mode(),
            },
            keymaster: KeymasterConfig::default(),
            pipeline: PipelineConfig::default(),
            simulator: MockConfig::default(),
            components: vec![
                ComponentDefinition::new("airspy", "AirspyComponent"),
                ComponentDefinition::new("fft", "FftComponent")
                    .with_sink(INPUT_SINK, "airspy.iq_data"),
                ComponentDefinition::new("display", "ConsoleDisplay")
                    .with_sink(INPUT_SINK, "fft.fft_data"),
            ],
        }
    }
}

impl SdrmConfig {
    /// Load configuration from the default file location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file leaves the built-in defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SDRM_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.keymaster.validate()?;

        // Validate pipeline bounds
        let pipeline = &self.pipeline;
        for (field, value) in [
            ("queue_depth", pipeline.queue_depth as u64),
            ("receive_timeout_ms", pipeline.receive_timeout_ms),
            ("start_timeout_ms", pipeline.start_timeout_ms),
            ("stop_timeout_ms", pipeline.stop_timeout_ms),
            ("block_timeout_ms", pipeline.block_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid pipeline.{field}: must be greater than 0"
                )));
            }
        }

        if self.simulator.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "Invalid simulator.batch_size: must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.simulator.drop_probability) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid simulator.drop_probability {}. Must be within 0-1",
                self.simulator.drop_probability
            )));
        }

        // Validate component names are unique
        let mut names = HashSet::new();
        for component in &self.components {
            if component.name.is_empty() || component.name.contains('.') {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid component name '{}'. Must be a single non-empty key segment",
                    component.name
                )));
            }
            if !names.insert(component.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate component name: '{}'",
                    component.name
                )));
            }
            if !KNOWN_KINDS.contains(&component.kind.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid component kind '{}' for component '{}'. Must be one of: {}",
                    component.kind,
                    component.name,
                    KNOWN_KINDS.join(", ")
                )));
            }
        }

        // Validate sinks point at produced topics
        let produced: HashSet<String> = self
            .enabled_components()
            .into_iter()
            .filter_map(|c| output_source(&c.kind).map(|source| format!("{}.{source}", c.name)))
            .collect();
        for component in self.enabled_components() {
            for (sink, topic) in &component.sinks {
                if !produced.contains(topic) {
                    return Err(ConfigError::ValidationError(format!(
                        "Sink '{sink}' of component '{}' references topic '{topic}' which no enabled component produces",
                        component.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Get all enabled components
    #[must_use]
    pub fn enabled_components(&self) -> Vec<&ComponentDefinition> {
        self.components.iter().filter(|c| c.enabled).collect()
    }
}
