use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Error,
    mock::MockNet,
    serial::{self, PortSettings, Record},
};

/// How a [`LineChannel`] for a given path comes to be.
///
/// Pipelines hold one of these so the close-then-reopen step between
/// classification and identification works the same against real ports
/// and mocked ones.
#[derive(Debug, Clone)]
pub enum ChannelOpener {
    /// A real port, opened through the OS.
    Serial(PortSettings),

    /// An in-memory port from a [`MockNet`].
    Mock(MockNet),
}

impl ChannelOpener {
    /// Open the port at `path`.
    ///
    /// The port is exclusively owned by the returned channel until that
    /// channel closes.
    pub fn open(&self, path: &str) -> Result<LineChannel, Error> {
        match self {
            ChannelOpener::Serial(settings) => serial::port::open(path, settings),
            ChannelOpener::Mock(net) => net.open(path),
        }
    }
}

/// A newline-delimited view of one open port.
///
/// Reading yields [`Record`]s in arrival order until the channel closes.
/// Writing hands the line to the pump task which puts it on the wire with
/// the configured terminator.
///
/// [`close`](Self::close) is idempotent and may race an expiring timeout;
/// whichever happens first wins and the other is a no-op. Once closed,
/// reads yield `None` and writes fail fast instead of hanging.
#[derive(Debug)]
pub struct LineChannel {
    path: String,
    records: mpsc::UnboundedReceiver<Record>,
    outgoing: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl LineChannel {
    pub(crate) fn from_parts(
        path: String,
        records: mpsc::UnboundedReceiver<Record>,
        outgoing: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
        pump: JoinHandle<()>,
    ) -> Self {
        Self {
            path,
            records,
            outgoing,
            cancel,
            pump,
        }
    }

    /// The path this channel was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The next record from the device, or `None` once the channel has
    /// closed (locally or because the device went away).
    pub async fn next_record(&mut self) -> Option<Record> {
        if self.cancel.is_cancelled() {
            return None;
        }

        self.records.recv().await
    }

    /// Queue a line for the wire. The terminator is appended by the codec.
    pub fn write_line(&self, text: &str) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::WriteFailed {
                path: self.path.clone(),
            });
        }

        self.outgoing
            .send(text.to_string())
            .map_err(|_| Error::WriteFailed {
                path: self.path.clone(),
            })
    }

    /// Close the channel and release the port. Safe to call any number of
    /// times, including while a read is pending.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Close and wait for the pump task to let go of the OS handle.
    ///
    /// Needed before reopening the same path; a plain [`close`](Self::close)
    /// only signals the pump, it does not wait for it.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.pump).await;
    }
}

impl Drop for LineChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
