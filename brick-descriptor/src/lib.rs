//! Brick Descriptors
//!
//! This crate turns the `BUILD.yaml` files of a workspace into strongly-typed
//! [`Target`]s. It includes:
//! - The descriptor schema as deserialized from YAML
//! - Parsing and validation, with `BRICK_*` variable expansion
//! - Workspace discovery (the `WORKSPACE` marker) and target loading
//!
//! Every failure here is a [`BrickError::Config`], raised before any graph
//! is built.

pub mod descriptor;
pub mod env;
pub mod parser;
pub mod workspace;

pub use descriptor::{StepDescriptor, TargetDescriptor};
pub use parser::{load_descriptor, parse_descriptor};
pub use workspace::{Workspace, find_workspace_root};

pub use brick_core::{BrickError, Result, Step, Target};
