use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The length every worker identifier has: a UUID-shaped token.
pub const IDENTITY_LEN: usize = 36;

/// A worker's stable unique identifier.
///
/// Bound to one port for the lifetime of a session and never mutated.
/// The only structural requirement is the length; workers are provisioned
/// with UUIDs but the bridge does not care beyond that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity(String);

/// Why a candidate identifier was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("bad worker identifier: expected {IDENTITY_LEN} characters, got {got} (`{candidate}`)")]
pub struct BadIdentity {
    /// Length of the rejected candidate.
    pub got: usize,

    /// The rejected candidate itself.
    pub candidate: String,
}

impl WorkerIdentity {
    /// Accept a candidate identifier if it holds the length invariant.
    pub fn parse(candidate: &str) -> Result<Self, BadIdentity> {
        if candidate.len() == IDENTITY_LEN {
            Ok(Self(candidate.to_string()))
        } else {
            Err(BadIdentity {
                got: candidate.len(),
                candidate: candidate.to_string(),
            })
        }
    }

    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The control feed topic carrying updates for this worker.
    pub fn control_topic(&self) -> String {
        format!("control-update-{}", self.0)
    }
}

impl Display for WorkerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
