use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::discovery;

/// The command line interface for the bridge.
///
/// Behavioural configuration lives in the environment (see
/// [`crate::config::Config`]); the CLI only carries operator
/// conveniences.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Also log to daily-rolling files in this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// List the serial ports the OS can see, then exit.
    Ports,
}

/// Run a subcommand to completion.
pub fn handle_command(command: Commands) -> color_eyre::Result<()> {
    match command {
        Commands::Ports => {
            let paths = discovery::available_port_paths()?;

            if paths.is_empty() {
                println!("No serial ports found");
            } else {
                for path in paths {
                    println!("{path}");
                }
            }
        }
    }

    Ok(())
}
