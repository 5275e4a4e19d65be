use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating a manifest.
///
/// None of these are retried: a manifest that fails validation never reaches
/// the planner.
#[derive(Debug, Error)]
pub enum ValidationError {
  /// The manifest file could not be read.
  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The manifest is not valid TOML or does not match the expected shape.
  #[error("failed to parse manifest: {0}")]
  Parse(#[from] toml::de::Error),

  /// A tool entry has an empty name.
  #[error("tool #{index} has an empty name")]
  EmptyName { index: usize },

  /// Two tool entries share a name.
  #[error("duplicate tool name: {0}")]
  DuplicateName(String),

  /// A tool depends on a name that is not declared in the manifest.
  #[error("tool {tool} depends on unknown tool {missing}")]
  MissingDependency { tool: String, missing: String },

  /// The dependency graph contains a cycle.
  #[error("dependency cycle detected: {}", chain.join(" -> "))]
  Cycle { chain: Vec<String> },

  /// A version constraint could not be parsed.
  #[error("tool {tool} has invalid version constraint {constraint:?}: {message}")]
  InvalidVersion {
    tool: String,
    constraint: String,
    message: String,
  },

  /// A tool field has an invalid value or a required field is absent.
  #[error("tool {tool}: invalid {field}: {message}")]
  InvalidField {
    tool: String,
    field: &'static str,
    message: String,
  },

  /// A `[settings]` value is invalid.
  #[error("invalid setting {field}: {message}")]
  InvalidSetting { field: &'static str, message: String },
}

impl ValidationError {
  /// Returns true if this error reports a dependency cycle.
  pub fn is_cycle(&self) -> bool {
    matches!(self, ValidationError::Cycle { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cycle_display_joins_chain() {
    let err = ValidationError::Cycle {
      chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
    };
    assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    assert!(err.is_cycle());
  }

  #[test]
  fn missing_dependency_is_not_cycle() {
    let err = ValidationError::MissingDependency {
      tool: "yq".to_string(),
      missing: "node".to_string(),
    };
    assert!(!err.is_cycle());
    assert_eq!(err.to_string(), "tool yq depends on unknown tool node");
  }
}
