//! Bounded data pipeline: typed channel endpoints and the threads that drain them.
//!
//! # Architecture
//!
//! ```text
//! DataSource<T> --publish--> DataBus<T> --bounded queue--> DataSink<T>
//!                                                              |
//!                                               SinkReader --> AcquisitionThread
//! ```
//!
//! Queues are FIFO per producer/consumer pair. A consumer thread never blocks
//! longer than its receive timeout, so clearing the run flag always takes effect
//! within one timeout period, and a [`SinkWaker`] shortens that to immediately.

pub mod channel;
pub mod thread;

pub use channel::{
    DataBus, DataSink, DataSource, PublishPolicy, PublishReport, SinkReader, SinkWaker,
    DEFAULT_QUEUE_DEPTH,
};
pub use thread::{
    run_receive_loop, AcquisitionThread, RunContext, Signal, StreamWorker, ThreadTiming,
};
