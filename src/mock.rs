//! In-memory ports, useful to exercise pipelines without physical workers.
//!
//! A [`MockNet`] is a registry of fake port paths. The test side holds a
//! [`MockDevice`] and plays the worker; the crate side opens the same path
//! through [`crate::channel::ChannelOpener::Mock`] and cannot tell the
//! difference.
//!
//! Lines emitted while no channel is open on the path go nowhere. That is
//! deliberate: it reproduces the data-loss window of the close-then-reopen
//! step between classification and identification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{channel::LineChannel, error::Error, serial::Record};

/// A registry of in-memory ports, keyed by path.
///
/// Cheap to clone; clones share the same ports.
#[derive(Debug, Clone, Default)]
pub struct MockNet {
    inner: Arc<Mutex<HashMap<String, MockWires>>>,
}

#[derive(Debug)]
struct MockWires {
    /// Device to host lines.
    to_host: broadcast::Sender<String>,

    /// Host to device writes.
    from_host: broadcast::Sender<String>,
}

impl MockWires {
    fn new() -> Self {
        let (to_host, _) = broadcast::channel(1024);
        let (from_host, _) = broadcast::channel(1024);

        Self { to_host, from_host }
    }
}

impl MockNet {
    /// Register `path` (if new) and return the device side of it.
    pub fn device(&self, path: &str) -> MockDevice {
        let mut ports = self.inner.lock().unwrap();
        let wires = ports
            .entry(path.to_string())
            .or_insert_with(MockWires::new);

        MockDevice {
            path: path.to_string(),
            to_host: wires.to_host.clone(),
            written: wires.from_host.subscribe(),
        }
    }

    /// Open a channel on `path`, as a pipeline would.
    ///
    /// Unknown paths behave like ports the OS refuses to open.
    pub fn open(&self, path: &str) -> Result<LineChannel, Error> {
        let (mut incoming, outgoing_wire) = {
            let ports = self.inner.lock().unwrap();
            let wires = ports.get(path).ok_or_else(|| Error::PortUnavailable {
                path: path.to_string(),
                reason: "no such mock port".to_string(),
            })?;

            (wires.to_host.subscribe(), wires.from_host.clone())
        };

        let (record_tx, record_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();

        let pump_cancel = cancel.clone();
        let pump_path = path.to_string();

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    line = incoming.recv() => match line {
                        Ok(text) => {
                            if record_tx.send(Record::new(&pump_path, text)).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(%pump_path, %n, "Mock port lagged, lines dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    maybe_out = out_rx.recv() => match maybe_out {
                        Some(text) => {
                            // Nobody on the device side listening is fine.
                            let _ = outgoing_wire.send(text);
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(LineChannel::from_parts(
            path.to_string(),
            record_rx,
            out_tx,
            cancel,
            pump,
        ))
    }
}

/// The worker's side of a mocked port.
pub struct MockDevice {
    path: String,
    to_host: broadcast::Sender<String>,
    written: broadcast::Receiver<String>,
}

impl MockDevice {
    /// The path this device sits on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Put one line on the wire towards the host.
    ///
    /// Dropped silently if no channel is open on the path.
    pub fn emit_line(&self, line: &str) {
        let _ = self.to_host.send(line.to_string());
    }

    /// The next line the host wrote to this device.
    pub async fn next_write(&mut self) -> Option<String> {
        loop {
            match self.written.recv().await {
                Ok(line) => return Some(line),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Wait until some channel is open on this path.
    ///
    /// Scripted devices use this to sequence output against the
    /// pipeline's open and reopen steps.
    pub async fn when_open(&self) {
        while self.to_host.receiver_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Wait until no channel is open on this path anymore.
    pub async fn wait_closed(&self) {
        while self.to_host.receiver_count() > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}
