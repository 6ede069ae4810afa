//! Custom error types for the application.
//!
//! This module defines the crate-level error type, `SdrmError`. Each subsystem owns
//! a narrower `thiserror` enum next to the code that produces it, and `SdrmError`
//! consolidates them with `#[from]` so `?` works across module boundaries.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: figment load failures and semantic validation errors
//!   ([`ConfigError`]).
//! - **`Store`**: coordination store failures such as missing keys or rejected
//!   writes ([`StoreError`]).
//! - **`Hardware`**: native receiver failures carrying the driver's return code
//!   ([`HardwareError`]).
//! - **`Registry`**: serial/handle bookkeeping failures ([`RegistryError`]).
//! - **`Lifecycle`**: acquisition threads that failed to start or stop within their
//!   bounded waits ([`LifecycleError`]).
//! - **`Dispatch`**: fatal command dispatcher failures, chiefly a response that
//!   could not be written back to the store ([`DispatchError`]).
//!
//! Per-command failures ([`crate::command::CommandError`]) are deliberately absent:
//! they are encoded into `ERROR` responses and never propagate as Rust errors.

use thiserror::Error;

use crate::command::DispatchError;
use crate::config::ConfigError;
use crate::hardware::registry::RegistryError;
use crate::hardware::HardwareError;
use crate::lifecycle::LifecycleError;
use crate::store::StoreError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SdrmError>;

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum SdrmError {
    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Coordination store failure.
    #[error("Coordination store error: {0}")]
    Store(#[from] StoreError),

    /// Native receiver failure.
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Device registry failure.
    #[error("Device registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Lifecycle transition failure.
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Fatal command dispatcher failure.
    #[error("Command dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// No factory is registered for a component kind.
    #[error("Unknown component kind '{0}'")]
    UnknownComponentKind(String),

    /// No component is registered under the name.
    #[error("Unknown component '{0}'")]
    UnknownComponent(String),

    /// A component definition is incomplete for its kind.
    #[error("Component '{component}' is misconfigured: {reason}")]
    ComponentConfig {
        /// Component instance name.
        component: String,
        /// What is missing or wrong.
        reason: String,
    },

    /// Several errors were collected while tearing the system down.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<SdrmError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SdrmError::UnknownComponentKind("Waterfall".to_string());
        assert_eq!(err.to_string(), "Unknown component kind 'Waterfall'");
    }

    #[test]
    fn test_nested_error_display() {
        let err: SdrmError = StoreError::NotFound("AIRSPYCMDS.open.rval".into()).into();
        assert_eq!(
            err.to_string(),
            "Coordination store error: key 'AIRSPYCMDS.open.rval' not found"
        );
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = SdrmError::ShutdownFailed(vec![
            SdrmError::UnknownComponentKind("a".into()),
            SdrmError::ComponentConfig {
                component: "fft".into(),
                reason: "missing sink".into(),
            },
        ]);
        assert!(err.to_string().contains("Shutdown failed"));
    }
}
