//! TOML manifest parsing.
//!
//! Raw serde structs mirror the file format; they are converted into the
//! typed [`Manifest`] and validated before being handed out.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::error::ValidationError;
use super::types::{Manifest, PackageManager, Settings, ToolKind, ToolSpec, VersionConstraint};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
  base_image: Option<String>,
  #[serde(default)]
  settings: RawSettings,
  #[serde(default, rename = "tool")]
  tools: Vec<RawTool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
  package_manager: Option<PackageManager>,
  bin_dir: Option<PathBuf>,
  shell: Option<String>,
  concurrency: Option<usize>,
  max_retries: Option<u32>,
  max_cycles: Option<u32>,
  timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTool {
  name: String,
  kind: ToolKind,
  version: Option<String>,
  #[serde(default)]
  depends_on: Vec<String>,
  install: Option<String>,
  check: Option<String>,
  binary: Option<String>,
  url: Option<String>,
  sha256: Option<String>,
  #[serde(default)]
  env: BTreeMap<String, String>,
  timeout: Option<String>,
}

impl RawTool {
  fn into_spec(self) -> Result<ToolSpec, ValidationError> {
    let version = match &self.version {
      Some(raw) => VersionConstraint::parse(raw).map_err(|e| ValidationError::InvalidVersion {
        tool: self.name.clone(),
        constraint: raw.clone(),
        message: e.to_string(),
      })?,
      None => VersionConstraint::Any,
    };

    let timeout = self
      .timeout
      .as_deref()
      .map(|raw| {
        parse_duration(raw).map_err(|message| ValidationError::InvalidField {
          tool: self.name.clone(),
          field: "timeout",
          message,
        })
      })
      .transpose()?;

    let mut depends_on: Vec<String> = Vec::with_capacity(self.depends_on.len());
    for dep in self.depends_on {
      if !depends_on.contains(&dep) {
        depends_on.push(dep);
      }
    }

    Ok(ToolSpec {
      name: self.name,
      kind: self.kind,
      version,
      depends_on,
      install: self.install,
      check: self.check,
      binary: self.binary,
      url: self.url,
      sha256: self.sha256.map(|s| s.to_ascii_lowercase()),
      env: self.env,
      timeout,
    })
  }
}

impl RawSettings {
  fn into_settings(self) -> Result<Settings, ValidationError> {
    let defaults = Settings::default();
    let timeout = self
      .timeout
      .as_deref()
      .map(|raw| parse_duration(raw).map_err(|message| ValidationError::InvalidSetting { field: "timeout", message }))
      .transpose()?;

    Ok(Settings {
      package_manager: self.package_manager.unwrap_or(defaults.package_manager),
      bin_dir: self.bin_dir.unwrap_or(defaults.bin_dir),
      shell: self.shell,
      concurrency: self.concurrency,
      max_retries: self.max_retries,
      max_cycles: self.max_cycles,
      timeout,
    })
  }
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
  humantime::parse_duration(raw.trim()).map_err(|e| format!("{raw:?}: {e}"))
}

impl Manifest {
  /// Parse and validate a manifest from TOML text.
  pub fn from_toml_str(input: &str) -> Result<Self, ValidationError> {
    let raw: RawManifest = toml::from_str(input)?;

    let tools = raw
      .tools
      .into_iter()
      .map(RawTool::into_spec)
      .collect::<Result<Vec<_>, _>>()?;

    let manifest = Manifest {
      base_image: raw.base_image,
      settings: raw.settings.into_settings()?,
      tools,
    };
    manifest.validate()?;

    debug!(tools = manifest.tools.len(), base_image = ?manifest.base_image, "manifest parsed");
    Ok(manifest)
  }

  /// Read, parse and validate a manifest file.
  pub fn from_path(path: &Path) -> Result<Self, ValidationError> {
    let input = std::fs::read_to_string(path).map_err(|source| ValidationError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml_str(&input)
  }

  /// Read, parse and validate a manifest from a reader (e.g. stdin).
  pub fn from_reader(mut reader: impl Read) -> Result<Self, ValidationError> {
    let mut input = String::new();
    reader
      .read_to_string(&mut input)
      .map_err(|source| ValidationError::Read {
        path: PathBuf::from("<stdin>"),
        source,
      })?;
    Self::from_toml_str(&input)
  }
}
