//! Brick CLI
//!
//! Brings the steps of a monorepo's targets up to date, running each one in
//! a container and skipping the ones whose inputs did not change.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use colored::*;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brick_engine::EngineConfig;

#[derive(Parser)]
#[command(name = "brick")]
#[command(about = "Incremental container builds for monorepos", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Also consider every target below the given directory
    #[arg(short, long, global = true)]
    recursive: bool,

    /// Do not pull in the earlier steps of the entry targets
    #[arg(long, global = true)]
    skip_previous_steps: bool,

    /// Run every step regardless of the cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Keep running independent steps after a failure
    #[arg(long, global = true)]
    keep_going: bool,

    /// Maximum number of steps running at the same time
    #[arg(short, long, global = true, env = "BRICK_MAX_PARALLEL_STEPS")]
    jobs: Option<usize>,

    /// Container engine used for steps with an image
    #[arg(long, global = true, env = "BRICK_CONTAINER_ENGINE", value_parser = ["podman", "docker"])]
    engine: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Environment configuration with the command-line overrides applied
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut engine = EngineConfig::from_env()?;
        if let Some(jobs) = self.jobs {
            engine.max_parallel_steps = jobs;
        }
        if let Some(name) = &self.engine {
            engine.container_engine = name.clone();
        }
        engine.continue_on_error |= self.keep_going;
        engine.validate()?;
        Ok(engine)
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "brick=debug" } else { "brick=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<bool> {
    let config = Config {
        cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        recursive: cli.recursive,
        skip_previous_steps: cli.skip_previous_steps,
        no_cache: cli.no_cache,
        engine: cli.engine_config()?,
    };

    handle_command(cli.command, &config).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step_command_with_flags() {
        let cli = Cli::try_parse_from(["brick", "-r", "--skip-previous-steps", "build", "www"])
            .unwrap();
        assert!(cli.recursive);
        assert!(cli.skip_previous_steps);
        match cli.command {
            Commands::Build { target } => assert_eq!(target, Some(PathBuf::from("www"))),
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["brick", "test", "--keep-going", "-j", "2"]).unwrap();
        assert!(cli.keep_going);
        assert_eq!(cli.jobs, Some(2));
    }

    #[test]
    fn test_run_requires_step() {
        assert!(Cli::try_parse_from(["brick", "run"]).is_err());
        let cli = Cli::try_parse_from(["brick", "run", "lint", "api"]).unwrap();
        match cli.command {
            Commands::Run { step, target } => {
                assert_eq!(step, "lint");
                assert_eq!(target, Some(PathBuf::from("api")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_unknown_engine_rejected() {
        assert!(Cli::try_parse_from(["brick", "--engine", "lxc", "build"]).is_err());
    }

    #[test]
    fn test_prune_older_than() {
        let cli = Cli::try_parse_from(["brick", "prune", "--older-than", "30"]).unwrap();
        match cli.command {
            Commands::Prune { older_than } => assert_eq!(older_than, Some(30)),
            _ => panic!("expected prune"),
        }
    }
}
