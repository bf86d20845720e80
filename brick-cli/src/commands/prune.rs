//! Prune command handler

use anyhow::{Result, bail};
use brick_descriptor::Workspace;
use brick_engine::Engine;
use colored::*;

use crate::config::Config;

/// Drops the cache records of steps that no longer exist, and of records
/// older than `older_than` days when given
pub fn handle_prune_command(older_than: Option<i64>, config: &Config) -> Result<bool> {
    if older_than.is_some_and(|days| days < 0) {
        bail!("--older-than must not be negative");
    }

    let workspace = Workspace::discover(&config.cwd)?;
    let engine = Engine::new(workspace.root(), config.engine.clone());
    let graph = engine.plan(&workspace.load_all()?)?;

    let removed = engine.prune(&graph, older_than.map(chrono::Duration::days))?;

    if removed.is_empty() {
        println!("{}", "Nothing to prune".yellow());
    } else {
        println!(
            "{}",
            format!("Pruned {} cache record(s):", removed.len()).bold()
        );
        for id in removed {
            println!("  {} {}", "✗".red(), id);
        }
    }

    Ok(true)
}
