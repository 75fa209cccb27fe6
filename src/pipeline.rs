use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    backend::{ControlFeed, MetricsReport},
    channel::ChannelOpener,
    classify::{classify, identify, is_device_type, Identification, Outcome},
    error::Error,
    relay,
    serial::StagePolicy,
};

/// Everything one port needs to go from "some tty" to a running session.
///
/// Cheap to clone; discovery hands one clone to each port's task. The
/// metrics sender and control feed are the shared backend capabilities,
/// everything else is per-pipeline state.
#[derive(Debug, Clone)]
pub struct Pipeline {
    opener: ChannelOpener,
    policy: StagePolicy,
    marker: String,
    metrics: mpsc::UnboundedSender<MetricsReport>,
    feed: ControlFeed,
}

impl Pipeline {
    /// Assemble a pipeline template.
    pub fn new(
        opener: ChannelOpener,
        policy: StagePolicy,
        marker: String,
        metrics: mpsc::UnboundedSender<MetricsReport>,
        feed: ControlFeed,
    ) -> Self {
        Self {
            opener,
            policy,
            marker,
            metrics,
            feed,
        }
    }

    /// Run the whole pipeline for one port: classify the device type,
    /// reopen, identify the worker, then relay until the channel closes.
    ///
    /// Every outcome short of a session is terminal for this port; there
    /// is no retry short of a fresh discovery cycle. Returns `Err` only
    /// for ports that could not be opened at all.
    pub async fn run(self, path: &str) -> Result<(), Error> {
        let mut channel = self.opener.open(path)?;

        info!("Found {path}, identifying...");

        match classify(&mut channel, &self.policy, |payload| {
            is_device_type(payload, &self.marker)
        })
        .await
        {
            Outcome::Match(_) => {
                info!("Device at {path} is a worker");
            }
            Outcome::Timeout => {
                info!(
                    "Device at {path} isn't sending any output; \
                     either it isn't a worker or it has been disconnected"
                );
                return Ok(());
            }
            Outcome::Abandoned(reason) => {
                warn!(?reason, "Device at {path} isn't outputting usable records");
                return Ok(());
            }
        }

        // The matched record is consumed, and identification wants a fresh
        // look at the stream. Close fully, then reopen with identical
        // parameters; whatever the device emits in between is lost, and
        // that is fine.
        channel.shutdown().await;
        let mut channel = self.opener.open(path)?;

        let identity = match identify(&mut channel, &self.policy).await {
            Identification::Identified(identity) => identity,
            Identification::Timeout => {
                info!(
                    "Device at {path} doesn't appear to be reporting a unique ID; \
                     it may need one provisioned"
                );
                return Ok(());
            }
            Identification::Abandoned(reason) => {
                warn!(?reason, "Gave up reading an ID from {path}");
                return Ok(());
            }
        };

        let commands = self.feed.subscribe(&identity);
        relay::run(channel, identity, self.metrics, commands).await;

        Ok(())
    }
}
