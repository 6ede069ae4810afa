//! Key-addressed remote procedure surface of hardware components.
//!
//! Operators write a positional argument list to `<NS>.<command>.request`. The
//! dispatcher decodes it, runs the bound hardware call and writes
//! `[status, echoed args..., results...]` to `<NS>.<command>.rval`:
//!
//! ```text
//! AIRSPYCMDS.set_freq.request  <- [1234, 145000000]
//! AIRSPYCMDS.set_freq.rval     -> ["SUCCESS", 1234, 145000000]
//!
//! AIRSPYCMDS.get_calibration.request <- [99]
//! AIRSPYCMDS.get_calibration.rval    -> ["ERROR", "device not found", 99]
//! ```
//!
//! Command failures are values ([`CommandError`]) encoded into the response.
//! Only a response that cannot be written escapes as a Rust error
//! ([`DispatchError`]).

pub mod airspy;
pub mod args;
pub mod dispatcher;

use serde_json::{json, Value};
use thiserror::Error;

use crate::hardware::registry::RegistryError;
use crate::hardware::HardwareError;
use crate::store::StoreError;

pub use airspy::airspy_commands;
pub use args::{FromArgs, IntoResults};
pub use dispatcher::{
    CommandDispatcher, CommandTable, DeviceCall, DispatchContext, FaultHandler, Scope,
};

/// Default command namespace.
pub const DEFAULT_NAMESPACE: &str = "AIRSPYCMDS";

/// Status tag of a successful response.
pub const SUCCESS: &str = "SUCCESS";

/// Status tag of a failed response.
pub const ERROR: &str = "ERROR";

const REQUEST_SUFFIX: &str = "request";
const RESPONSE_SUFFIX: &str = "rval";

/// Reasons a single command fails. Each maps to a stable wire string.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// No open device for the serial.
    #[error("device {0:#x} not found")]
    DeviceNotFound(u64),

    /// The serial is already open.
    #[error("device {0:#x} already open")]
    AlreadyOpen(u64),

    /// The native call returned an error status.
    #[error("{operation} failed with native status {code}")]
    HardwareOperationFailed {
        /// Native operation.
        operation: String,
        /// Native return code.
        code: i32,
    },

    /// The command is not allowed in the device's current state.
    #[error("invalid precondition: {0}")]
    InvalidPrecondition(String),

    /// The driver failed unexpectedly.
    #[error("runtime fault: {0}")]
    RuntimeFault(String),

    /// The positional arguments do not fit the command.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl CommandError {
    /// Stable wire string placed after `ERROR`.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DeviceNotFound(_) => "device not found",
            Self::AlreadyOpen(_) => "already open",
            Self::HardwareOperationFailed { .. } => "hardware operation failed",
            Self::InvalidPrecondition(_) => "invalid precondition",
            Self::RuntimeFault(_) => "runtime fault",
            Self::InvalidArguments(_) => "invalid arguments",
        }
    }

    /// Context values placed after the reason.
    #[must_use]
    pub fn context(&self) -> Vec<Value> {
        match self {
            Self::DeviceNotFound(serial) | Self::AlreadyOpen(serial) => vec![json!(serial)],
            Self::HardwareOperationFailed { operation, code } => {
                vec![json!(operation), json!(code)]
            }
            Self::InvalidPrecondition(message)
            | Self::RuntimeFault(message)
            | Self::InvalidArguments(message) => {
                vec![json!(message)]
            }
        }
    }
}

impl From<HardwareError> for CommandError {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::Failed { operation, code } => {
                Self::HardwareOperationFailed { operation, code }
            }
            HardwareError::Fault(message) => Self::RuntimeFault(message),
        }
    }
}

impl From<RegistryError> for CommandError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyOpen(serial) => Self::AlreadyOpen(serial),
            RegistryError::NotFound(serial) => Self::DeviceNotFound(serial),
            RegistryError::NotStreaming(handle) => {
                Self::InvalidPrecondition(format!("{handle} is not streaming"))
            }
            RegistryError::Hardware(hw) => hw.into(),
        }
    }
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    /// Echoed arguments followed by results.
    Success(Vec<Value>),
    /// The failure, encoded as reason plus context.
    Failure(CommandError),
}

impl CommandResponse {
    /// True for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Wire form: `["SUCCESS", values...]` or `["ERROR", reason, context...]`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut frame = Vec::new();
        match self {
            Self::Success(values) => {
                frame.push(json!(SUCCESS));
                frame.extend(values.iter().cloned());
            }
            Self::Failure(err) => {
                frame.push(json!(ERROR));
                frame.push(json!(err.reason()));
                frame.extend(err.context());
            }
        }
        Value::Array(frame)
    }
}

/// Fatal dispatcher failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The response could not be written back.
    #[error("failed to write response to '{key}': {source}")]
    ResponseWrite {
        /// Response key.
        key: String,
        /// Store failure.
        source: StoreError,
    },

    /// The key is not `<namespace>.<command>.request`.
    #[error("'{0}' is not a request key")]
    MalformedKey(String),

    /// No handler is registered under the command name.
    #[error("no handler for command '{0}'")]
    UnknownCommand(String),
}

/// `<namespace>.<command>.request`
#[must_use]
pub fn request_key(namespace: &str, command: &str) -> String {
    format!("{namespace}.{command}.{REQUEST_SUFFIX}")
}

/// Replaces the final segment of a request key with `rval`.
#[must_use]
pub fn response_key(request_key: &str) -> Option<String> {
    let (stem, _) = request_key.rsplit_once('.')?;
    Some(format!("{stem}.{RESPONSE_SUFFIX}"))
}

/// Command name of `<namespace>.<command>.request`.
#[must_use]
pub fn command_name<'a>(namespace: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(namespace)?.strip_prefix('.')?;
    let command = rest.strip_suffix(REQUEST_SUFFIX)?.strip_suffix('.')?;
    (!command.is_empty() && !command.contains('.')).then_some(command)
}
