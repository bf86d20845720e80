//! Graph command handler

use anyhow::{Context, Result};
use brick_descriptor::Workspace;
use brick_engine::BuildGraph;
use std::path::PathBuf;

use crate::config::Config;

/// Prints the build graph as JSON on stdout
///
/// With a target, only that target's steps and everything they depend on
/// are shown.
pub fn handle_graph_command(target: Option<PathBuf>, config: &Config) -> Result<bool> {
    let dir = config.target_dir(target.as_deref());
    let workspace = Workspace::discover(&dir)?;
    let graph = BuildGraph::build(&workspace.load_all()?)?;

    let graph = match target {
        Some(_) => {
            let own = workspace.load_targets(&dir, false)?;
            let entries: Vec<_> = own.iter().flat_map(|t| t.step_ids()).collect();
            graph.restrict(&graph.subgraph_for(&entries, false)?)
        }
        None => graph,
    };

    let json = serde_json::to_string_pretty(&graph).context("Failed to serialize the graph")?;
    println!("{}", json);
    Ok(true)
}
