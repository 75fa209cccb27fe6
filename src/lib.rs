#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// The backend side: the shared metrics sink, the uploader task and the
/// control update feed.
pub mod backend;

/// The line-oriented channel over one open port, and how to open one.
pub mod channel;

/// The command line interface.
pub mod cli;

/// Device classification and worker identification stages.
pub mod classify;

/// Runtime configuration, read from the environment.
pub mod config;

/// Port enumeration and the per-port pipeline fan-out.
pub mod discovery;

/// Possible errors in this crate.
pub mod error;

/// Single-shot stage deadlines.
pub mod guard;

/// Logging/tracing setup.
pub mod logging;

/// In-memory ports for tests.
pub mod mock;

/// The per-port pipeline: classify, identify, relay.
pub mod pipeline;

/// Relaying of an identified session: telemetry out, controls in.
pub mod relay;

/// Serial port driver: codec, settings, records.
pub mod serial;

/// Worker identities.
pub mod worker;
