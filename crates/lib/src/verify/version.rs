//! Version extraction from probe output.

use semver::Version;

/// Find the first version-looking token in `text`.
///
/// Candidates are runs of digits and dots that start at a non-digit
/// boundary. The first run containing a dot wins; a bare number is used only
/// when no dotted run exists. Missing minor/patch components read as 0, and
/// anything after the third component is ignored, so `1:9.0.1000-4`,
/// `v20.11.0` and `go1.22` all parse.
pub fn extract_version(text: &str) -> Option<Version> {
  let bytes = text.as_bytes();
  let mut first_bare: Option<&str> = None;
  let mut i = 0;

  while i < bytes.len() {
    let boundary = i == 0 || !(bytes[i - 1].is_ascii_digit() || bytes[i - 1] == b'.');
    if bytes[i].is_ascii_digit() && boundary {
      let start = i;
      while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
      }
      let run = text[start..i].trim_end_matches('.');
      if run.contains('.') {
        if let Some(version) = parse_lenient(run) {
          return Some(version);
        }
      } else if first_bare.is_none() {
        first_bare = Some(run);
      }
      continue;
    }
    i += 1;
  }

  first_bare.and_then(parse_lenient)
}

/// Parse `major[.minor[.patch[...]]]`, ignoring extra components.
pub fn parse_lenient(run: &str) -> Option<Version> {
  let mut parts = run.split('.').filter(|p| !p.is_empty());
  let major = parts.next()?.parse().ok()?;
  let minor = parts.next().map(str::parse).transpose().ok()?.unwrap_or(0);
  let patch = parts.next().map(str::parse).transpose().ok()?.unwrap_or(0);
  Some(Version::new(major, minor, patch))
}
