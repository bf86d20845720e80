//! Descriptor schema
//!
//! The shape of a `BUILD.yaml` file exactly as written by users. These types
//! are only an intermediate form: [`crate::parser`] validates them and
//! converts them into [`brick_core::Target`].

use indexmap::IndexMap;
use serde::Deserialize;

/// Top-level mapping of a `BUILD.yaml`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDescriptor {
    /// Overrides the target name (defaults to the directory name)
    #[serde(default)]
    pub name: Option<String>,

    /// Steps in declaration order
    pub steps: IndexMap<String, StepDescriptor>,
}

/// A single step entry under `steps`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDescriptor {
    #[serde(default)]
    pub image: Option<String>,

    pub commands: Vec<String>,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub pass_ssh: bool,

    #[serde(default)]
    pub ports: Vec<u16>,
}
