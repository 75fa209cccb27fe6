use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::{
    channel::LineChannel,
    guard::TimeoutGuard,
    serial::StagePolicy,
    worker::{WorkerIdentity, IDENTITY_LEN},
};

/// Terminal result of one classification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A record satisfied the predicate; here is its decoded payload.
    /// The channel is left open for the caller.
    Match(Value),

    /// No qualifying record arrived within the window. Channel closed.
    Timeout,

    /// The stage gave up on the port. Channel closed.
    Abandoned(AbandonReason),
}

/// Why a stage gave up on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// Too many records in a row that were not JSON at all.
    Malformed {
        /// The last offending line, for the logs.
        sample: String,
    },

    /// The channel closed under the stage (device unplugged, port lost).
    Disconnected,
}

/// Terminal result of the identification stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    /// The worker told us who it is. The channel is left open for the
    /// relay; no further reopen happens.
    Identified(WorkerIdentity),

    /// No identifying record within the window.
    Timeout,

    /// The stage gave up; see [`AbandonReason`].
    Abandoned(AbandonReason),
}

/// Watch `channel` until a record decodes as JSON *and* satisfies
/// `predicate`, the window runs out, or too much of the stream turns out
/// to be garbage.
///
/// Failure accounting, deliberately asymmetric:
/// - records that are not JSON count toward `max_failures`; one more than
///   that resolves [`Outcome::Abandoned`]. Joining a stream halfway
///   through a line looks exactly like this, hence the tolerance.
/// - records that are JSON but fail the predicate are *not* counted. A
///   chatty worker mixing other output in with its identification lines
///   can take as long as it needs, up to the window.
///
/// The counter never decrements and resets only when a new stage begins.
pub async fn classify<P>(channel: &mut LineChannel, policy: &StagePolicy, predicate: P) -> Outcome
where
    P: Fn(&Value) -> bool,
{
    let mut guard = TimeoutGuard::arm(policy.window);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            _ = guard.expired() => {
                channel.close();
                return Outcome::Timeout;
            }
            maybe_record = channel.next_record() => {
                let record = match maybe_record {
                    Some(record) => record,
                    None => return Outcome::Abandoned(AbandonReason::Disconnected),
                };

                match serde_json::from_str::<Value>(&record.text) {
                    Ok(payload) if predicate(&payload) => {
                        guard.disarm();
                        return Outcome::Match(payload);
                    }
                    Ok(_) => {
                        // Well-formed but not what we're waiting for.
                        trace!(%record, "Record does not match, still waiting");
                    }
                    Err(e) => {
                        if failures >= policy.max_failures {
                            warn!(%record, %e, "Too many broken records");
                            channel.close();
                            return Outcome::Abandoned(AbandonReason::Malformed {
                                sample: record.text,
                            });
                        }

                        failures += 1;
                        debug!(%record, %failures, "Broken record, tolerating");
                    }
                }
            }
        }
    }
}

/// Predicate for the device-type stage: the record announces itself as a
/// worker of the expected kind.
///
/// Wire shape: `{"type":"identification","value":"<marker>"}`.
pub fn is_device_type(payload: &Value, marker: &str) -> bool {
    payload.get("type").and_then(Value::as_str) == Some("identification")
        && payload.get("value").and_then(Value::as_str) == Some(marker)
}

fn identity_field(payload: &Value) -> Option<&str> {
    payload.get("workerIdentifier").and_then(Value::as_str)
}

/// Watch an already-classified port until it reports its identifier.
///
/// Runs [`classify`] with a predicate requiring a `workerIdentifier`
/// field of exactly [`IDENTITY_LEN`] characters. A well-formed record
/// with an identifier of any other length is treated as non-matching,
/// not as a failure.
pub async fn identify(channel: &mut LineChannel, policy: &StagePolicy) -> Identification {
    let outcome = classify(channel, policy, |payload| {
        identity_field(payload).map_or(false, |id| id.len() == IDENTITY_LEN)
    })
    .await;

    match outcome {
        Outcome::Match(payload) => {
            // The predicate vouched for presence and length.
            let candidate = identity_field(&payload).unwrap_or_default();

            match WorkerIdentity::parse(candidate) {
                Ok(identity) => {
                    info!(%identity, "Identification success");
                    Identification::Identified(identity)
                }
                Err(e) => {
                    warn!(%e, "Matched record lost its identifier");
                    channel.close();
                    Identification::Abandoned(AbandonReason::Malformed {
                        sample: payload.to_string(),
                    })
                }
            }
        }
        Outcome::Timeout => Identification::Timeout,
        Outcome::Abandoned(reason) => Identification::Abandoned(reason),
    }
}
