use itertools::Itertools;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{config::Config, error::Error, pipeline::Pipeline};

/// Every serial port path the OS currently knows about, de-duplicated.
pub fn available_port_paths() -> Result<Vec<String>, Error> {
    let ports =
        tokio_serial::available_ports().map_err(|e| Error::PortEnumeration(e.to_string()))?;

    Ok(ports.into_iter().map(|p| p.port_name).unique().collect())
}

/// The ports this run should look at: the configured list if one was
/// given, otherwise whatever the OS enumerates.
pub fn candidate_ports(config: &Config) -> Result<Vec<String>, Error> {
    match &config.devices {
        Some(devices) => Ok(devices.iter().cloned().unique().collect()),
        None => available_port_paths(),
    }
}

/// Fan out one pipeline task per port and wait for all of them.
///
/// Pipelines are fully independent: a port timing out, being abandoned,
/// or failing to open never touches its neighbours. Returns once every
/// pipeline has ended; long-lived sessions keep theirs running
/// indefinitely.
pub async fn run(pipeline: Pipeline, ports: Vec<String>) {
    info!("Attempting to locate attached worker devices");

    let mut pipelines = JoinSet::new();

    for path in ports {
        let pipeline = pipeline.clone();
        let span = info_span!("pipeline", %path);

        pipelines.spawn(
            async move {
                if let Err(e) = pipeline.run(&path).await {
                    warn!(%e, "Pipeline could not start");
                }

                path
            }
            .instrument(span),
        );
    }

    while let Some(finished) = pipelines.join_next().await {
        match finished {
            Ok(path) => debug!(%path, "Pipeline ended"),
            Err(e) => warn!(%e, "Pipeline task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn configured_devices_win_over_enumeration_and_are_deduplicated() {
        let config = Config::from_lookup(|name| match name {
            "BACKEND_URL" => Some("http://x".to_string()),
            "WORKER_DEVICES" => Some("/dev/ttyACM0,/dev/ttyACM1,/dev/ttyACM0".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(
            candidate_ports(&config).unwrap(),
            vec!["/dev/ttyACM0".to_string(), "/dev/ttyACM1".to_string()]
        );
    }
}
