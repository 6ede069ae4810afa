//! Lifecycle-gated acquisition threads.
//!
//! An [`AcquisitionThread`] owns one OS thread, its run flag and two one-shot
//! signals: `started`, raised by the task when it enters its loop, and `exited`,
//! raised when the task returns or unwinds. Starting waits on `started` and
//! stopping waits on `exited`, both with bounded timeouts, so no lifecycle
//! transition can hang on a misbehaving task.
//!
//! [`StreamWorker`] combines a thread with the [`DataSink`] it drains and runs
//! the standard receive loop ([`run_receive_loop`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::channel::{DataSink, SinkReader};
use crate::lifecycle::LifecycleError;

// =============================================================================
// Signal
// =============================================================================

/// Resettable one-shot condition with a bounded wait.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Signal {
    /// Creates a cleared signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes every waiter.
    pub fn raise(&self) {
        let (flag, cond) = &*self.inner;
        *flag.lock() = true;
        cond.notify_all();
    }

    /// Clears the signal.
    pub fn reset(&self) {
        *self.inner.0.lock() = false;
    }

    /// True once raised and not yet reset.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Waits until raised or until `timeout` elapses. Returns whether it was raised.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cond) = &*self.inner;
        let mut raised = flag.lock();
        if !*raised {
            // spurious wake-ups are handled by the predicate loop
            let _ = cond.wait_while_for(&mut raised, |raised| !*raised, timeout);
        }
        *raised
    }
}

// =============================================================================
// Run context
// =============================================================================

/// Handed to the task running on an acquisition thread.
pub struct RunContext {
    run: Arc<AtomicBool>,
    started: Signal,
}

impl RunContext {
    /// Announces loop entry. Only the first call has an effect.
    pub fn signal_started(&self) {
        if !self.started.is_raised() {
            self.started.raise();
        }
    }

    /// True while the owner wants the loop to keep going.
    #[must_use]
    pub fn should_run(&self) -> bool {
        self.run.load(Ordering::Acquire)
    }
}

struct ExitGuard(Signal);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.raise();
    }
}

// =============================================================================
// Acquisition thread
// =============================================================================

/// One background thread with a run flag and start/exit signals.
pub struct AcquisitionThread {
    name: String,
    run: Arc<AtomicBool>,
    started: Signal,
    exited: Signal,
    handle: Option<JoinHandle<()>>,
}

impl AcquisitionThread {
    /// Creates an idle thread slot. `name` becomes the OS thread name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: Arc::new(AtomicBool::new(false)),
            started: Signal::new(),
            exited: Signal::new(),
            handle: None,
        }
    }

    /// Thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while a spawned task has not yet returned.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.handle.is_some() && !self.exited.is_raised()
    }

    /// True once the current task has signalled loop entry.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.started.is_raised()
    }

    /// Sets the run flag and spawns `task`.
    ///
    /// Fails with [`LifecycleError::StillRunning`] while an earlier task has not
    /// returned; that task is left as it is.
    pub fn spawn<F>(&mut self, task: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(RunContext) + Send + 'static,
    {
        if self.is_alive() {
            return Err(LifecycleError::StillRunning(self.name.clone()));
        }
        self.reap();
        self.run.store(true, Ordering::Release);

        self.exited.reset();
        let ctx = RunContext {
            run: Arc::clone(&self.run),
            started: self.started.clone(),
        };
        let guard = ExitGuard(self.exited.clone());
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _guard = guard;
                task(ctx);
            })
            .map_err(|source| LifecycleError::Spawn {
                thread: self.name.clone(),
                source,
            })?;
        self.handle = Some(handle);
        tracing::debug!(thread = %self.name, "Acquisition thread spawned");
        Ok(())
    }

    /// Waits for the task to signal loop entry.
    pub fn wait_started(&self, timeout: Duration) -> Result<(), LifecycleError> {
        if self.started.wait(timeout) {
            Ok(())
        } else {
            Err(LifecycleError::StartTimeout {
                thread: self.name.clone(),
                timeout,
            })
        }
    }

    /// Clears the run flag. The task notices on its next loop iteration.
    pub fn request_stop(&self) {
        self.run.store(false, Ordering::Release);
    }

    /// Sets the run flag again after a stop whose join timed out.
    pub fn resume(&self) {
        if self.handle.is_some() {
            self.run.store(true, Ordering::Release);
        }
    }

    /// Waits for the task to return, joins it and resets the start signal.
    ///
    /// On timeout the handle is kept so a later call can finish the join.
    pub fn join(&mut self, timeout: Duration) -> Result<(), LifecycleError> {
        if self.handle.is_none() {
            self.started.reset();
            return Ok(());
        }
        if !self.exited.wait(timeout) {
            return Err(LifecycleError::StopTimeout {
                thread: self.name.clone(),
                timeout,
            });
        }
        self.reap();
        self.started.reset();
        Ok(())
    }

    fn reap(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(thread = %self.name, "Acquisition thread panicked");
            } else {
                tracing::debug!(thread = %self.name, "Acquisition thread joined");
            }
        }
    }
}

impl Drop for AcquisitionThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
            if let Err(e) = self.join(Duration::from_secs(5)) {
                tracing::warn!(thread = %self.name, error = %e, "Detaching acquisition thread");
            }
        }
    }
}

// =============================================================================
// Receive loop
// =============================================================================

/// Timing used by acquisition threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadTiming {
    /// Timeout of each blocking receive.
    pub receive_timeout: Duration,
    /// Bound on the wait for the start signal.
    pub start_timeout: Duration,
    /// Bound on the wait for the task to exit.
    pub stop_timeout: Duration,
}

impl Default for ThreadTiming {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(1),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Standard acquisition loop: signal start, then receive and handle until the
/// run flag is cleared. A receive timeout just re-checks the flag.
pub fn run_receive_loop<T, F>(
    ctx: &RunContext,
    reader: &SinkReader<T>,
    receive_timeout: Duration,
    mut on_item: F,
) where
    F: FnMut(T),
{
    ctx.signal_started();
    while ctx.should_run() {
        if let Some(item) = reader.timed_receive(receive_timeout) {
            on_item(item);
        }
    }
}

/// Sink plus the thread that drains it.
pub struct StreamWorker<T> {
    sink: DataSink<T>,
    thread: AcquisitionThread,
    input_topic: String,
    timing: ThreadTiming,
}

impl<T: Send + 'static> StreamWorker<T> {
    /// Creates a stopped worker that will drain `input_topic` through `sink`.
    pub fn new(
        name: impl Into<String>,
        sink: DataSink<T>,
        input_topic: impl Into<String>,
        timing: ThreadTiming,
    ) -> Self {
        Self {
            sink,
            thread: AcquisitionThread::new(name),
            input_topic: input_topic.into(),
            timing,
        }
    }

    /// Topic the worker drains.
    #[must_use]
    pub fn input_topic(&self) -> &str {
        &self.input_topic
    }

    /// True while the worker thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.is_alive()
    }

    /// Connects, spawns the receive loop calling `on_item` per value and waits
    /// for it to start. Any failure runs the full shutdown sequence.
    pub fn start<F>(&mut self, on_item: F) -> Result<(), LifecycleError>
    where
        F: FnMut(T) + Send + 'static,
    {
        let receive_timeout = self.timing.receive_timeout;
        self.start_with(move |ctx, reader| {
            run_receive_loop(&ctx, &reader, receive_timeout, on_item);
        })
    }

    /// Like [`StreamWorker::start`] but runs `task` in place of the standard
    /// loop. The task must call [`RunContext::signal_started`].
    pub fn start_with<F>(&mut self, task: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(RunContext, SinkReader<T>) + Send + 'static,
    {
        if self.thread.is_alive() {
            // left over from a rollback whose join timed out
            self.thread.request_stop();
            self.sink.waker().wake();
            self.thread.join(self.timing.stop_timeout)?;
        }

        self.sink.connect(&self.input_topic);
        let Some(reader) = self.sink.reader() else {
            return Err(LifecycleError::NotConnected(self.input_topic.clone()));
        };

        let spawned = self.thread.spawn(move |ctx| task(ctx, reader));
        let started = spawned.and_then(|()| self.thread.wait_started(self.timing.start_timeout));
        if let Err(e) = started {
            if let Err(stop_err) = self.halt() {
                tracing::error!(
                    thread = %self.thread.name(),
                    error = %stop_err,
                    "Rollback after failed start did not complete"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Clears the run flag, wakes the receiver, joins and disconnects.
    ///
    /// If the join times out the run flag is set again and the sink stays
    /// connected, so the worker keeps consuming and a later call can finish
    /// the stop.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        self.thread.request_stop();
        self.sink.waker().wake();
        match self.thread.join(self.timing.stop_timeout) {
            Ok(()) => {
                self.sink.disconnect();
                Ok(())
            }
            Err(e) => {
                self.thread.resume();
                tracing::warn!(
                    thread = %self.thread.name(),
                    error = %e,
                    "Stop timed out, worker left running"
                );
                Err(e)
            }
        }
    }

    // Unconditional teardown: the sink is detached even if the join times out.
    fn halt(&mut self) -> Result<(), LifecycleError> {
        self.thread.request_stop();
        self.sink.waker().wake();
        let joined = self.thread.join(self.timing.stop_timeout);
        self.sink.disconnect();
        joined
    }
}

impl<T> Drop for StreamWorker<T> {
    fn drop(&mut self) {
        // AcquisitionThread's own Drop joins; waking first keeps it prompt
        self.thread.request_stop();
        self.sink.waker().wake();
    }
}
