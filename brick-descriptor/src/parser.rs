//! Descriptor parser
//!
//! This module parses `BUILD.yaml` sources into [`Target`]s and validates
//! them, so that missing or malformed fields surface as configuration
//! errors here instead of deep inside graph construction.

use brick_core::{BrickError, DESCRIPTOR_FILE, Result, Step, Target};
use std::path::Path;
use tracing::debug;

use crate::descriptor::{StepDescriptor, TargetDescriptor};
use crate::env::expand_brick_variables;

/// Parse a target from descriptor source
///
/// `BRICK_*` variables are expanded before the YAML is parsed.
///
/// # Arguments
/// * `source` - The raw `BUILD.yaml` contents
/// * `rel_dir` - Target directory relative to the workspace root (`.` for the root)
/// * `dir` - Absolute target directory, used for the default name
///
/// # Errors
/// Returns [`BrickError::Config`] if:
/// - The YAML is invalid or has unknown fields
/// - `steps` is missing or empty, or a step lacks `commands`
/// - A target or step name is empty or contains `:`
///
/// # Example
/// ```
/// use brick_descriptor::parse_descriptor;
/// use std::path::Path;
///
/// let source = r#"
/// name: www
/// steps:
///   prepare:
///     image: node:20
///     commands: ["yarn install"]
///     inputs: [package.json, yarn.lock]
///   build:
///     commands: ["yarn build"]
///     inputs: [src, static]
///     outputs: [public]
/// "#;
///
/// let target = parse_descriptor(source, "www", Path::new("/repo/www"))?;
/// assert_eq!(target.name, "www");
/// assert_eq!(target.steps[0].name, "prepare");
/// # Ok::<(), brick_descriptor::BrickError>(())
/// ```
pub fn parse_descriptor(source: &str, rel_dir: &str, dir: &Path) -> Result<Target> {
    let context = format!("{}/{}", rel_dir, DESCRIPTOR_FILE);

    let expanded = expand_brick_variables(source)
        .map_err(|e| BrickError::config(format!("{}: {}", context, inner_message(e))))?;

    let descriptor: TargetDescriptor = serde_yaml::from_str(&expanded)
        .map_err(|e| BrickError::config(format!("{}: malformed descriptor: {}", context, e)))?;

    let name = match descriptor.name {
        Some(name) => name,
        None => default_name(dir).ok_or_else(|| {
            BrickError::config(format!(
                "{}: cannot derive a target name from {}, set 'name'",
                context,
                dir.display()
            ))
        })?,
    };
    validate_name(&name, "target", &context)?;

    if descriptor.steps.is_empty() {
        return Err(BrickError::config(format!(
            "{}: target '{}' must declare at least one step",
            context, name
        )));
    }

    let mut steps = Vec::with_capacity(descriptor.steps.len());
    for (step_name, desc) in descriptor.steps {
        validate_name(&step_name, "step", &context)?;
        steps.push(into_step(step_name, desc));
    }

    debug!("Parsed target '{}' with {} step(s)", name, steps.len());

    Ok(Target {
        name,
        rel_dir: rel_dir.to_string(),
        dir: dir.to_path_buf(),
        steps,
    })
}

/// Read and parse the descriptor in `dir`
pub fn load_descriptor(dir: &Path, rel_dir: &str) -> Result<Target> {
    let path = dir.join(DESCRIPTOR_FILE);
    let source = std::fs::read_to_string(&path).map_err(|e| {
        BrickError::config(format!("{} not found or unreadable: {}", path.display(), e))
    })?;
    parse_descriptor(&source, rel_dir, dir)
}

fn into_step(name: String, desc: StepDescriptor) -> Step {
    Step {
        name,
        image: desc.image.filter(|image| !image.trim().is_empty()),
        commands: desc.commands,
        inputs: desc.inputs,
        outputs: desc.outputs,
        pass_ssh: desc.pass_ssh,
        ports: desc.ports,
    }
}

fn default_name(dir: &Path) -> Option<String> {
    dir.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn validate_name(name: &str, kind: &str, context: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BrickError::config(format!(
            "{}: {} name cannot be empty",
            context, kind
        )));
    }
    if name.contains(':') {
        return Err(BrickError::config(format!(
            "{}: {} name '{}' cannot contain ':'",
            context, kind, name
        )));
    }
    Ok(())
}

fn inner_message(err: BrickError) -> String {
    match err {
        BrickError::Config(message) => message,
        other => other.to_string(),
    }
}
