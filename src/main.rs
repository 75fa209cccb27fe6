use clap::Parser;
use color_eyre::Result;

use altar_bridge::{
    backend::{Backend, ControlFeed},
    channel::ChannelOpener,
    cli,
    config::Config,
    discovery, logging,
    pipeline::Pipeline,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        return cli::handle_command(command);
    }

    logging::init(cli.log_dir);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // The one process-fatal failure; everything downstream is
            // isolated per port.
            error!(%e, "Cannot start without valid configuration");
            std::process::exit(1);
        }
    };

    let backend = Backend::new(config.metrics_url(), config.envelope);
    let metrics = altar_bridge::backend::spawn_uploader(backend);
    let feed = ControlFeed::connect(config.control_url());

    let pipeline = Pipeline::new(
        ChannelOpener::Serial(config.port_settings()),
        config.stage_policy(),
        config.marker.clone(),
        metrics,
        feed,
    );

    let ports = discovery::candidate_ports(&config)?;

    #[cfg(unix)]
    let mut hangup = signal(SignalKind::hangup())?;
    #[cfg(not(unix))]
    let hangup = std::future::pending::<Option<()>>();

    let bridge = async {
        discovery::run(pipeline, ports).await;

        // Sessions and pipelines are done, but the process stays up;
        // rediscovery is a restart away and the control feed keeps its
        // connection warm.
        info!("All port pipelines have ended");
        std::future::pending::<()>().await
    };

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C, quitting")
            }
            _ = hangup.recv() => {
                info!("Told to hang up, quitting")
            }
            _ = bridge => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = hangup;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C, quitting")
            }
            _ = bridge => {}
        }
    }

    Ok(())
}
