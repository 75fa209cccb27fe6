use thiserror::Error;

/// Errors that may occur in this crate.
///
/// Per-port failures are isolated by the pipeline that hit them;
/// only configuration errors are fatal to the process.
#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration variable was not set.
    #[error("required configuration `{0}` is missing")]
    ConfigMissing(&'static str),

    /// A configuration variable was set to something unusable.
    #[error("configuration `{name}` is invalid: {reason}")]
    ConfigInvalid {
        /// The variable in question.
        name: &'static str,

        /// What was wrong with it.
        reason: String,
    },

    /// The serial port could not be opened.
    #[error("could not open port `{path}`: {reason}")]
    PortUnavailable {
        /// The path of the port, e.g. `/dev/ttyACM0` or `COM3`.
        path: String,

        /// The underlying problem.
        reason: String,
    },

    /// The OS port listing itself failed.
    #[error("could not enumerate serial ports: {0}")]
    PortEnumeration(String),

    /// A write was attempted on a channel which has already closed.
    #[error("write to `{path}` failed: channel is closed")]
    WriteFailed {
        /// The path of the port the write was destined for.
        path: String,
    },

    /// The backend could not be reached, or answered with an error status.
    #[error("backend request failed")]
    Sink(#[from] reqwest::Error),
}
