//! Target and step domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Stable identifier of a step across the whole workspace
///
/// Rendered and serialized as `target:step`. Graph adjacency, cache records
/// and run reports are all keyed by this identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepId {
    pub target: String,
    pub step: String,
}

impl StepId {
    pub fn new(target: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            step: step.into(),
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target, self.step)
    }
}

impl FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((target, step)) if !target.is_empty() && !step.is_empty() => {
                Ok(StepId::new(target, step))
            }
            _ => Err(format!("invalid step id '{}', expected target:step", s)),
        }
    }
}

impl TryFrom<String> for StepId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StepId> for String {
    fn from(id: StepId) -> Self {
        id.to_string()
    }
}

/// One named phase of commands within a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Container image; `None` runs the commands on the host
    pub image: Option<String>,
    pub commands: Vec<String>,
    /// Path patterns relative to the target directory
    pub inputs: Vec<String>,
    /// Path patterns relative to the target directory
    pub outputs: Vec<String>,
    /// Forward the host SSH agent socket into the container
    pub pass_ssh: bool,
    /// Ports published while developing; not part of the fingerprint
    pub ports: Vec<u16>,
}

impl Step {
    /// Creates a step with the given name and commands and nothing else declared
    pub fn new(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            image: None,
            commands,
            inputs: Vec::new(),
            outputs: Vec::new(),
            pass_ssh: false,
            ports: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }
}

/// One buildable unit, declared by one descriptor file
///
/// Immutable for the duration of an invocation. Step order is the
/// intra-target execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    /// Directory relative to the workspace root, `/`-separated (`.` for the root)
    pub rel_dir: String,
    /// Absolute directory of the target
    pub dir: PathBuf,
    pub steps: Vec<Step>,
}

impl Target {
    /// Looks up a step by name
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_id(&self, step: &str) -> StepId {
        StepId::new(&self.name, step)
    }

    /// Identifiers of all steps in declaration order
    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| self.step_id(&s.name)).collect()
    }
}
