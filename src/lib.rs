//! Core library for the sdrm application.
//!
//! sdrm drives an AirspyHF+ class receiver through a small component graph:
//!
//! ```text
//! operator --request keys--> CommandDispatcher --> DeviceRegistry --> receiver
//!                                                                        |
//!                                          sample callback (driver thread)
//!                                                                        v
//! AirspyComponent.iq_data --> FftComponent --fft_data--> ConsoleDisplay
//! ```
//!
//! Each component is wrapped in a [`lifecycle::LifecycleMachine`] and sequenced
//! by the [`architect::Architect`]. Processing stages drain their input on a
//! dedicated [`pipeline::AcquisitionThread`].

pub mod architect;
pub mod command;
pub mod components;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod hardware;
pub mod lifecycle;
pub mod pipeline;
pub mod store;
pub mod testing;

pub use error::{AppResult, SdrmError};
