//! Manifest types for converge.
//!
//! The manifest is the central data structure that captures the desired state
//! of an environment: which OS packages, language runtimes and standalone
//! binaries must be present, in which versions, and in which order they may be
//! installed.
//!
//! # Ordering
//!
//! Tools keep their declaration order. The planner uses it as the tie-break
//! between tools that have no dependency relationship, so the same manifest
//! always produces the same action sequence.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use semver::{Op, Version, VersionReq};
use serde::{Deserialize, Serialize, Serializer};

use crate::consts::DEFAULT_BIN_DIR;
use crate::util::shell_quote;

use super::error::ValidationError;
use super::graph::DependencyGraph;

/// What sort of software a tool is.
///
/// The kind selects the default install action and the default probe used by
/// the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
  /// A package installed through the system package manager.
  OsPackage,
  /// A language runtime (node, python, ...). Installed by its `install`
  /// script, or through the package manager when none is given.
  Runtime,
  /// A single executable downloaded from a URL and placed in `bin_dir`.
  StandaloneBinary,
}

impl ToolKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ToolKind::OsPackage => "os-package",
      ToolKind::Runtime => "runtime",
      ToolKind::StandaloneBinary => "standalone-binary",
    }
  }
}

impl fmt::Display for ToolKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// System package manager used for `os-package` tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
  #[default]
  Apt,
  Apk,
  Dnf,
}

impl PackageManager {
  pub fn as_str(&self) -> &'static str {
    match self {
      PackageManager::Apt => "apt",
      PackageManager::Apk => "apk",
      PackageManager::Dnf => "dnf",
    }
  }

  /// Shell command installing `package`, optionally pinned to `pin`. The
  /// package argument is shell-quoted.
  pub fn install_command(&self, package: &str, pin: Option<&str>) -> String {
    let arg = match (self, pin) {
      (_, None) => shell_quote(package),
      (PackageManager::Apt, Some(v)) => shell_quote(&format!("{package}={v}*")),
      (PackageManager::Apk, Some(v)) => shell_quote(&format!("{package}~{v}")),
      (PackageManager::Dnf, Some(v)) => shell_quote(&format!("{package}-{v}")),
    };
    match self {
      PackageManager::Apt => format!("DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends {arg}"),
      PackageManager::Apk => format!("apk add --no-cache {arg}"),
      PackageManager::Dnf => format!("dnf install -y {arg}"),
    }
  }

  /// Shell command that exits 0 and prints the installed version when
  /// `package` is installed, and exits non-zero otherwise.
  pub fn query_command(&self, package: &str) -> String {
    let package = shell_quote(package);
    match self {
      PackageManager::Apt => {
        format!("dpkg-query -W -f='${{db:Status-Status}} ${{Version}}\\n' {package} 2>/dev/null | grep '^installed '")
      }
      PackageManager::Apk => format!("apk info -e {package} >/dev/null && apk info -v {package} 2>/dev/null"),
      PackageManager::Dnf => format!("rpm -q --qf '%{{VERSION}}\\n' {package}"),
    }
  }
}

impl fmt::Display for PackageManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Acceptable versions for a tool.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionConstraint {
  /// Any installed version satisfies the tool.
  #[default]
  Any,
  /// The installed version must match the requirement.
  Req(VersionReq),
}

impl VersionConstraint {
  /// Parse a constraint. `""`, `"*"` and `"latest"` mean any version.
  pub fn parse(input: &str) -> Result<Self, semver::Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed == "*" || trimmed.eq_ignore_ascii_case("latest") {
      return Ok(VersionConstraint::Any);
    }
    Ok(VersionConstraint::Req(VersionReq::parse(trimmed)?))
  }

  pub fn is_any(&self) -> bool {
    matches!(self, VersionConstraint::Any)
  }

  pub fn matches(&self, version: &Version) -> bool {
    match self {
      VersionConstraint::Any => true,
      VersionConstraint::Req(req) => req.matches(version),
    }
  }

  /// The pinned version when the constraint is a single exact requirement
  /// (`=1.2.3`), used to pin package installs.
  pub fn exact(&self) -> Option<String> {
    let VersionConstraint::Req(req) = self else {
      return None;
    };
    let [comparator] = req.comparators.as_slice() else {
      return None;
    };
    if comparator.op != Op::Exact {
      return None;
    }
    let mut pin = comparator.major.to_string();
    if let Some(minor) = comparator.minor {
      pin.push_str(&format!(".{minor}"));
      if let Some(patch) = comparator.patch {
        pin.push_str(&format!(".{patch}"));
      }
    }
    Some(pin)
  }
}

impl fmt::Display for VersionConstraint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      VersionConstraint::Any => f.write_str("*"),
      VersionConstraint::Req(req) => write!(f, "{req}"),
    }
  }
}

impl Serialize for VersionConstraint {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

/// One desired tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
  /// Unique name within the manifest. Also the package name for
  /// `os-package` tools.
  pub name: String,
  pub kind: ToolKind,
  pub version: VersionConstraint,
  /// Names of tools that must be installed first, in declaration order.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  /// Shell script replacing the default install action.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub install: Option<String>,
  /// Shell command replacing the default probe. Exit 0 means present; stdout
  /// is scanned for a version.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub check: Option<String>,
  /// Executable probed on `PATH`. Defaults to `name`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub binary: Option<String>,
  /// Download source for `standalone-binary` tools.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  /// Expected SHA256 of the download (lowercase hex).
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sha256: Option<String>,
  /// Extra environment variables for the install action.
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
  /// Per-tool action timeout, overriding the run default.
  #[serde(skip)]
  pub timeout: Option<Duration>,
}

impl ToolSpec {
  pub fn new(name: impl Into<String>, kind: ToolKind) -> Self {
    Self {
      name: name.into(),
      kind,
      version: VersionConstraint::Any,
      depends_on: Vec::new(),
      install: None,
      check: None,
      binary: None,
      url: None,
      sha256: None,
      env: BTreeMap::new(),
      timeout: None,
    }
  }

  pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.depends_on = deps.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_version(mut self, version: VersionConstraint) -> Self {
    self.version = version;
    self
  }

  /// The executable name probed on `PATH`.
  pub fn binary_name(&self) -> &str {
    self.binary.as_deref().unwrap_or(&self.name)
  }

  fn validate(&self) -> Result<(), ValidationError> {
    if self.kind == ToolKind::StandaloneBinary && self.url.is_none() && self.install.is_none() {
      return Err(ValidationError::InvalidField {
        tool: self.name.clone(),
        field: "url",
        message: "standalone-binary tools need a url or an install script".to_string(),
      });
    }

    if let Some(url) = &self.url
      && !(url.starts_with("https://") || url.starts_with("http://"))
    {
      return Err(ValidationError::InvalidField {
        tool: self.name.clone(),
        field: "url",
        message: format!("unsupported scheme in {url:?} (expected http or https)"),
      });
    }

    if let Some(sha256) = &self.sha256 {
      if self.url.is_none() {
        return Err(ValidationError::InvalidField {
          tool: self.name.clone(),
          field: "sha256",
          message: "sha256 given without url".to_string(),
        });
      }
      if sha256.len() != 64 || !sha256.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
        return Err(ValidationError::InvalidField {
          tool: self.name.clone(),
          field: "sha256",
          message: "expected 64 lowercase hex characters".to_string(),
        });
      }
    }

    for (field, value) in [("install", &self.install), ("check", &self.check)] {
      if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
        return Err(ValidationError::InvalidField {
          tool: self.name.clone(),
          field,
          message: "must not be empty".to_string(),
        });
      }
    }

    if self.timeout.is_some_and(|t| t.is_zero()) {
      return Err(ValidationError::InvalidField {
        tool: self.name.clone(),
        field: "timeout",
        message: "must be greater than zero".to_string(),
      });
    }

    Ok(())
  }
}

/// Run settings carried by the manifest. CLI flags take precedence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
  pub package_manager: PackageManager,
  /// Directory receiving downloaded standalone binaries.
  pub bin_dir: PathBuf,
  /// Shell used for scripts and probes. Defaults to `/bin/sh`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub shell: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub concurrency: Option<usize>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_retries: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_cycles: Option<u32>,
  #[serde(skip)]
  pub timeout: Option<Duration>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      package_manager: PackageManager::default(),
      bin_dir: PathBuf::from(DEFAULT_BIN_DIR),
      shell: None,
      concurrency: None,
      max_retries: None,
      max_cycles: None,
      timeout: None,
    }
  }
}

/// The complete desired state of an environment.
///
/// Construct it with [`Manifest::new`] or one of the parsing constructors so
/// that it is validated. The fields stay public so the planner can be handed
/// (and must re-check) hand-built manifests.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Manifest {
  /// Base image the environment is expected to start from. Informational.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub base_image: Option<String>,
  pub settings: Settings,
  /// Tools in declaration order.
  pub tools: Vec<ToolSpec>,
}

impl Manifest {
  /// Build and validate a manifest with default settings.
  pub fn new(tools: Vec<ToolSpec>) -> Result<Self, ValidationError> {
    let manifest = Self {
      base_image: None,
      settings: Settings::default(),
      tools,
    };
    manifest.validate()?;
    Ok(manifest)
  }

  /// Check every manifest invariant: unique non-empty names, known
  /// dependencies, an acyclic dependency graph and well-formed tool fields.
  pub fn validate(&self) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for (index, tool) in self.tools.iter().enumerate() {
      if tool.name.trim().is_empty() {
        return Err(ValidationError::EmptyName { index });
      }
      if !seen.insert(tool.name.as_str()) {
        return Err(ValidationError::DuplicateName(tool.name.clone()));
      }
    }

    for tool in &self.tools {
      tool.validate()?;
    }

    if self.settings.concurrency == Some(0) {
      return Err(ValidationError::InvalidSetting {
        field: "concurrency",
        message: "must be at least 1".to_string(),
      });
    }
    if self.settings.max_cycles == Some(0) {
      return Err(ValidationError::InvalidSetting {
        field: "max_cycles",
        message: "must be at least 1".to_string(),
      });
    }

    let graph = DependencyGraph::build(self)?;
    graph.topological_order()?;

    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&ToolSpec> {
    self.tools.iter().find(|t| t.name == name)
  }

  /// Declaration index of a tool.
  pub fn position(&self, name: &str) -> Option<usize> {
    self.tools.iter().position(|t| t.name == name)
  }

  pub fn len(&self) -> usize {
    self.tools.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tools.is_empty()
  }
}
