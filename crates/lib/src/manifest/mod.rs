//! Manifest model.
//!
//! A manifest is the declarative description of the tools an environment
//! should contain. It is parsed from TOML, validated once, and treated as
//! immutable for the rest of a convergence run.

mod error;
mod graph;
mod parse;
mod types;

pub use error::ValidationError;
pub use graph::DependencyGraph;
pub use types::*;
