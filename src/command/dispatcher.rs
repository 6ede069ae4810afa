//! Generic command dispatch driven by a declarative table.
//!
//! A [`CommandTable`] binds command names to typed closures. Each binding fixes
//! the argument shape (a [`FromArgs`] tuple), the scope, the call and the result
//! encoding ([`IntoResults`]); one generic wrapper handles decoding, serial
//! resolution, fault capture and echoing for all of them.
//!
//! # Serialization
//!
//! Handlers run on the store's callback thread while holding the dispatcher's
//! context lock, so at most one command touches the registry or the hardware at
//! a time. The response is written after the lock is released.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::args::{FromArgs, IntoResults};
use super::{command_name, request_key, response_key, CommandError, CommandResponse, DispatchError};
use crate::hardware::{DeviceRegistry, RadioDevice, SampleCallback};
use crate::store::{CoordinationStore, StoreCallback, StoreError, SubscriptionId};

/// Receives fatal dispatcher errors raised on the store's callback thread.
pub type FaultHandler = Arc<dyn Fn(DispatchError) + Send + Sync>;

type Handler =
    Box<dyn Fn(&mut DispatchContext, &[Value]) -> Result<Vec<Value>, CommandError> + Send + Sync>;

/// Whether a command addresses one open device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Library-level command.
    Global,
    /// First argument is the serial of an open device.
    Device,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// State handlers run against: the device registry and the sample callback
/// installed on every stream the dispatcher starts.
pub struct DispatchContext {
    registry: DeviceRegistry,
    on_samples: SampleCallback,
}

impl DispatchContext {
    /// Bundles a registry with the callback used by `start`.
    pub fn new(registry: DeviceRegistry, on_samples: SampleCallback) -> Self {
        Self { registry, on_samples }
    }

    /// The device registry.
    pub fn registry(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }
}

/// Arguments of a device-scoped call besides the decoded tuple.
pub struct DeviceCall<'a> {
    /// Serial the request addressed.
    pub serial: u64,
    /// The open device.
    pub device: &'a mut (dyn RadioDevice + 'static),
    /// Callback to register when starting a stream.
    pub on_samples: &'a SampleCallback,
}

struct Binding {
    scope: Scope,
    handler: Handler,
}

/// Declarative command table.
#[derive(Default)]
pub struct CommandTable {
    commands: BTreeMap<&'static str, Binding>,
}

impl CommandTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a library-level command.
    #[must_use]
    pub fn global<A, R, F>(mut self, name: &'static str, call: F) -> Self
    where
        A: FromArgs,
        R: IntoResults,
        F: Fn(&mut DispatchContext, A) -> Result<R, CommandError> + Send + Sync + 'static,
    {
        let handler: Handler = Box::new(move |ctx: &mut DispatchContext, args: &[Value]| {
            let decoded = A::from_args(args)?;
            call(ctx, decoded).map(IntoResults::into_results)
        });
        self.commands.insert(
            name,
            Binding {
                scope: Scope::Global,
                handler,
            },
        );
        self
    }

    /// Binds a device-scoped command. The serial is resolved before the
    /// remaining arguments are decoded, so an unknown serial yields
    /// `DeviceNotFound` without touching the hardware.
    #[must_use]
    pub fn device<A, R, F>(mut self, name: &'static str, call: F) -> Self
    where
        A: FromArgs,
        R: IntoResults,
        F: Fn(&mut DeviceCall<'_>, A) -> Result<R, CommandError> + Send + Sync + 'static,
    {
        let handler: Handler = Box::new(move |ctx: &mut DispatchContext, args: &[Value]| {
            let Some((first, rest)) = args.split_first() else {
                return Err(CommandError::InvalidArguments("missing device serial".into()));
            };
            let (serial,) = <(u64,)>::from_args(std::slice::from_ref(first))?;
            let on_samples = &ctx.on_samples;
            let device = ctx
                .registry
                .lookup(serial)
                .map_err(|_| CommandError::DeviceNotFound(serial))?;
            let decoded = A::from_args(rest)?;
            let mut call_ctx = DeviceCall {
                serial,
                device,
                on_samples,
            };
            call(&mut call_ctx, decoded).map(IntoResults::into_results)
        });
        self.commands.insert(
            name,
            Binding {
                scope: Scope::Device,
                handler,
            },
        );
        self
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }

    /// Scope of a registered command.
    #[must_use]
    pub fn scope(&self, name: &str) -> Option<Scope> {
        self.commands.get(name).map(|binding| binding.scope)
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Turns request keys into hardware calls and writes the responses.
pub struct CommandDispatcher {
    namespace: String,
    table: CommandTable,
    context: Mutex<DispatchContext>,
    store: Arc<dyn CoordinationStore>,
}

impl CommandDispatcher {
    /// Creates a dispatcher for `namespace`.
    pub fn new(
        namespace: impl Into<String>,
        table: CommandTable,
        context: DispatchContext,
        store: Arc<dyn CoordinationStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            namespace: namespace.into(),
            table,
            context: Mutex::new(context),
            store,
        })
    }

    /// Command namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The bound command table.
    #[must_use]
    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Runs a command synchronously without touching the store.
    pub fn execute(&self, command: &str, args: &[Value]) -> Result<CommandResponse, DispatchError> {
        let binding = self
            .table
            .commands
            .get(command)
            .ok_or_else(|| DispatchError::UnknownCommand(command.to_string()))?;

        let result = {
            let mut ctx = self.context.lock();
            panic::catch_unwind(AssertUnwindSafe(|| (binding.handler)(&mut *ctx, args)))
                .unwrap_or_else(|payload| {
                    Err(CommandError::RuntimeFault(panic_message(payload.as_ref())))
                })
        };

        Ok(match result {
            Ok(values) => {
                tracing::debug!(namespace = %self.namespace, command, "Command succeeded");
                let mut echoed = args.to_vec();
                echoed.extend(values);
                CommandResponse::Success(echoed)
            }
            Err(err) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    command,
                    reason = err.reason(),
                    error = %err,
                    "Command failed"
                );
                CommandResponse::Failure(err)
            }
        })
    }

    /// Handles a write to a request key: executes the command and writes the
    /// response to the matching `rval` key.
    pub fn handle(&self, key: &str, value: &Value) -> Result<CommandResponse, DispatchError> {
        let command = command_name(&self.namespace, key)
            .ok_or_else(|| DispatchError::MalformedKey(key.to_string()))?;
        let response_key =
            response_key(key).ok_or_else(|| DispatchError::MalformedKey(key.to_string()))?;
        let args = match value {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        };

        let response = self.execute(command, &args)?;
        self.store
            .put(&response_key, response.to_value())
            .map_err(|source| DispatchError::ResponseWrite {
                key: response_key.clone(),
                source,
            })?;
        Ok(response)
    }

    /// Subscribes every command's request key. Fatal errors raised while
    /// handling a request are passed to `on_fault`.
    pub fn subscribe(
        self: &Arc<Self>,
        on_fault: FaultHandler,
    ) -> Result<Vec<SubscriptionId>, StoreError> {
        let mut ids = Vec::with_capacity(self.table.len());
        for command in self.table.names() {
            let key = request_key(&self.namespace, command);
            let dispatcher = Arc::downgrade(self);
            let on_fault = Arc::clone(&on_fault);
            let callback: StoreCallback = Arc::new(move |key: &str, value: &Value| {
                let Some(dispatcher) = dispatcher.upgrade() else {
                    return;
                };
                match dispatcher.handle(key, value) {
                    Ok(_) => {}
                    Err(err @ DispatchError::ResponseWrite { .. }) => {
                        tracing::error!(key, error = %err, "Response write failed");
                        on_fault(err);
                    }
                    Err(err) => tracing::warn!(key, error = %err, "Ignoring request"),
                }
            });

            match self.store.subscribe(&key, callback) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    self.unsubscribe(&ids);
                    return Err(err);
                }
            }
        }
        tracing::debug!(
            namespace = %self.namespace,
            commands = ids.len(),
            "Command handlers attached"
        );
        Ok(ids)
    }

    /// Removes subscriptions made by [`CommandDispatcher::subscribe`].
    pub fn unsubscribe(&self, ids: &[SubscriptionId]) {
        for id in ids {
            if let Err(err) = self.store.unsubscribe(*id) {
                tracing::warn!(%id, error = %err, "Unsubscribe failed");
            }
        }
    }

    /// Runs `f` with exclusive access to the dispatch context.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut DispatchContext) -> R) -> R {
        f(&mut *self.context.lock())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
