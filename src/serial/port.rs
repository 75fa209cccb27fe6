use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, trace, warn, Instrument};

use crate::{
    channel::LineChannel,
    error::Error,
    serial::{codec::LinesCodec, PortSettings, Record},
};

/// Open the port at `path` and spawn the pump task which shuttles lines
/// between the wire and the channel's queues.
///
/// The pump exits on cancellation, on a wire error, or when the device
/// goes away; there is no reconnect. A port that vanishes mid-pipeline is
/// simply not a worker right now.
pub(crate) fn open(path: &str, settings: &PortSettings) -> Result<LineChannel, Error> {
    let stream = tokio_serial::new(path, settings.baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| Error::PortUnavailable {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

    let (mut sink, mut lines) = LinesCodec::new(settings.terminator).framed(stream).split();

    let (record_tx, record_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let cancel = CancellationToken::new();

    let pump_cancel = cancel.clone();
    let pump_path = path.to_string();

    let span = info_span!("port", path = %path);
    let pump = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    maybe_line = lines.next() => match maybe_line {
                        Some(Ok(text)) => {
                            trace!("<- `{}`", text.chars().take(48).collect::<String>());

                            if record_tx.send(Record::new(&pump_path, text)).is_err() {
                                // Nobody is reading anymore.
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(?e, "Read error, releasing port");
                            break;
                        }
                        None => {
                            info!("Device went away");
                            break;
                        }
                    },
                    maybe_out = out_rx.recv() => match maybe_out {
                        Some(text) => {
                            trace!("-> `{text}`");

                            if let Err(e) = sink.send(text).await {
                                warn!(?e, "Write to device failed");
                            }
                        }
                        None => break,
                    },
                }
            }
        }
        .instrument(span),
    );

    Ok(LineChannel::from_parts(
        path.to_string(),
        record_rx,
        out_tx,
        cancel,
        pump,
    ))
}
