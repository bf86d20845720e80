//! Step command handlers
//!
//! `prepare`, `build`, `test`, `deploy`, `develop` and `run` all select a
//! step name in a set of targets and bring those steps up to date.

use anyhow::{Context, Result};
use brick_core::{StepId, Target};
use brick_descriptor::Workspace;
use brick_engine::{Engine, ScheduleRequest};
use colored::*;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::Config;
use crate::output::print_report;

/// How the entry steps are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Skip entry steps whose fingerprint is cached
    Normal,
    /// Always run the entry steps and publish their ports
    Develop,
}

/// Runs `step_name` in the targets selected by `target` and prints the report
pub async fn handle_step_command(
    step_name: &str,
    target: Option<PathBuf>,
    mode: Mode,
    config: &Config,
) -> Result<bool> {
    let dir = config.target_dir(target.as_deref());
    let workspace = Workspace::discover(&dir)?;
    let targets = workspace
        .load_all()
        .context("Failed to load the workspace targets")?;

    let selected = select_targets(&workspace, &targets, &dir, config.recursive)?;
    let entries = entry_steps(&selected, step_name);
    if entries.is_empty() {
        println!("{}", format!("Nothing to {}", step_name).yellow());
        return Ok(true);
    }
    debug!("Entry steps: {:?}", entries);

    let engine = Engine::new(workspace.root(), config.engine.clone());
    let graph = engine.plan(&targets)?;

    let request = ScheduleRequest {
        entries,
        skip_previous: config.skip_previous_steps,
        force: config.no_cache,
        force_entries: mode == Mode::Develop,
        continue_on_error: config.engine.continue_on_error,
        publish_ports: mode == Mode::Develop,
    };

    let report = engine.run(&graph, &request).await?;
    print_report(&report);
    Ok(report.is_success())
}

/// The targets an invocation starts from
///
/// Without `recursive` this is the target rooted at `dir`, which must have a
/// descriptor. With it, every target at or below `dir`.
fn select_targets<'a>(
    workspace: &Workspace,
    targets: &'a [Target],
    dir: &Path,
    recursive: bool,
) -> Result<Vec<&'a Target>> {
    let rel_dir = workspace.rel_dir(dir)?;

    if !recursive {
        let own = workspace.load_targets(dir, false)?;
        let names: Vec<&str> = own.iter().map(|t| t.rel_dir.as_str()).collect();
        return Ok(targets
            .iter()
            .filter(|t| names.contains(&t.rel_dir.as_str()))
            .collect());
    }

    Ok(targets
        .iter()
        .filter(|t| is_within(&t.rel_dir, &rel_dir))
        .collect())
}

/// Whether the target directory `rel_dir` lies at or below `base`
fn is_within(rel_dir: &str, base: &str) -> bool {
    base == "."
        || rel_dir == base
        || rel_dir
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Identifiers of `step_name` in every target declaring it
fn entry_steps(targets: &[&Target], step_name: &str) -> Vec<StepId> {
    let mut entries = Vec::new();
    for target in targets {
        if target.step(step_name).is_some() {
            entries.push(target.step_id(step_name));
        } else {
            println!(
                "{}",
                format!("Nothing to {} in {}", step_name, target.name).dimmed()
            );
        }
    }
    entries
}
