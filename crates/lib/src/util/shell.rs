use std::path::Path;

/// Quote `s` for a POSIX shell. Words made only of safe characters are
/// returned unchanged.
pub fn shell_quote(s: &str) -> String {
  if !s.is_empty()
    && s
      .bytes()
      .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b'+'))
  {
    return s.to_string();
  }
  format!("'{}'", s.replace('\'', r"'\''"))
}

pub fn shell_quote_path(path: &Path) -> String {
  shell_quote(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quoting() {
    assert_eq!(shell_quote("yq"), "yq");
    assert_eq!(shell_quote("/usr/local/bin/yq"), "/usr/local/bin/yq");
    assert_eq!(shell_quote("g++"), "g++");
    assert_eq!(shell_quote("my tool"), "'my tool'");
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
    assert_eq!(shell_quote("curl; rm -rf ~"), "'curl; rm -rf ~'");
    assert_eq!(shell_quote(""), "''");
  }
}
