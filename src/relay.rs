use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::{
    backend::{ControlUpdate, MetricsReport},
    channel::LineChannel,
    worker::{WorkerIdentity, IDENTITY_LEN},
};

/// Bridge one identified session until its channel closes.
///
/// Two independent flows:
/// - telemetry: every record is decoded; records carrying this session's
///   shape of identifier (36 characters) are forwarded raw to the shared
///   uploader. A record that is not JSON at all is fatal here — after
///   identification the stream is supposed to be clean, so garbage means
///   corruption and the session ends.
/// - control: updates from the feed are validated and written to the
///   device as `key:value` lines, in arrival order. A failed write or an
///   incomplete update is logged and skipped, never fatal.
///
/// Once the session ends it stays ended; rediscovery takes a fresh
/// discovery cycle.
pub async fn run(
    mut channel: LineChannel,
    identity: WorkerIdentity,
    metrics: mpsc::UnboundedSender<MetricsReport>,
    mut commands: mpsc::UnboundedReceiver<ControlUpdate>,
) {
    info!(%identity, path = %channel.path(), "Relaying metrics and controls");

    let mut commands_open = true;

    loop {
        tokio::select! {
            maybe_record = channel.next_record() => {
                let record = match maybe_record {
                    Some(record) => record,
                    None => {
                        info!(%identity, "Channel closed, session over");
                        break;
                    }
                };

                match serde_json::from_str::<Value>(&record.text) {
                    Ok(payload) => {
                        let declared = payload
                            .get("workerIdentifier")
                            .and_then(Value::as_str)
                            .unwrap_or_default();

                        if declared.len() == IDENTITY_LEN {
                            let report = MetricsReport {
                                worker: identity.clone(),
                                body: record.text,
                            };

                            if metrics.send(report).is_err() {
                                warn!(%identity, "Uploader gone, telemetry dropped");
                            }
                        } else {
                            trace!(%record, "Record without identifier, skipping");
                        }
                    }
                    Err(e) => {
                        error!(%record, %e, "Broken JSON mid-session, closing");
                        channel.close();
                        break;
                    }
                }
            }
            maybe_update = commands.recv(), if commands_open => {
                let update = match maybe_update {
                    Some(update) => update,
                    None => {
                        // The feed went away; telemetry is unaffected.
                        debug!(%identity, "Control feed closed for this session");
                        commands_open = false;
                        continue;
                    }
                };

                match (&update.key, &update.value) {
                    (Some(key), Some(value)) => {
                        debug!(%identity, %key, %value, "Control update");

                        if let Err(e) = channel.write_line(&format!("{key}:{value}")) {
                            warn!(%identity, %e, "Control write failed");
                        }
                    }
                    _ => {
                        warn!(
                            %identity,
                            ?update,
                            "Control update missing controlKey or controlValue, dropping"
                        );
                    }
                }
            }
        }
    }

    channel.close();
}
