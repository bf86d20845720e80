//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod graph;
mod prune;
mod step;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the `prepare` step of the selected targets
    Prepare {
        /// Target directory (default: current directory)
        target: Option<PathBuf>,
    },
    /// Run the `build` step of the selected targets
    Build {
        /// Target directory (default: current directory)
        target: Option<PathBuf>,
    },
    /// Run the `test` step of the selected targets
    Test {
        /// Target directory (default: current directory)
        target: Option<PathBuf>,
    },
    /// Run the `deploy` step of the selected targets
    Deploy {
        /// Target directory (default: current directory)
        target: Option<PathBuf>,
    },
    /// Always run the `develop` step, publishing its ports
    Develop {
        /// Target directory (default: current directory)
        target: Option<PathBuf>,
    },
    /// Run an arbitrary step of the selected targets
    Run {
        /// Step name
        step: String,

        /// Target directory (default: current directory)
        target: Option<PathBuf>,
    },
    /// Drop cache records of removed steps
    Prune {
        /// Also drop records older than this many days
        #[arg(long, value_name = "DAYS")]
        older_than: Option<i64>,
    },
    /// Print the build graph as JSON
    Graph {
        /// Only show the steps needed by this target directory
        target: Option<PathBuf>,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Returns
/// `Ok(false)` when the command ran but some step failed or was blocked
pub async fn handle_command(command: Commands, config: &Config) -> Result<bool> {
    match command {
        Commands::Prepare { target } => {
            step::handle_step_command("prepare", target, step::Mode::Normal, config).await
        }
        Commands::Build { target } => {
            step::handle_step_command("build", target, step::Mode::Normal, config).await
        }
        Commands::Test { target } => {
            step::handle_step_command("test", target, step::Mode::Normal, config).await
        }
        Commands::Deploy { target } => {
            step::handle_step_command("deploy", target, step::Mode::Normal, config).await
        }
        Commands::Develop { target } => {
            step::handle_step_command("develop", target, step::Mode::Develop, config).await
        }
        Commands::Run { step: name, target } => {
            step::handle_step_command(&name, target, step::Mode::Normal, config).await
        }
        Commands::Prune { older_than } => prune::handle_prune_command(older_than, config),
        Commands::Graph { target } => graph::handle_graph_command(target, config),
    }
}
