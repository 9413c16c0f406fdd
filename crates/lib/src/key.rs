//! Relative keys: the join key between resource folders and the target tree.
//!
//! A key is a normalized, `/`-separated relative path with no `.`/`..`
//! components. The same key addresses a resource under its watched root, the
//! file it lands on in the target directory, and its backup record.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
  #[error("relative key is empty")]
  Empty,

  #[error("path is not relative: {0}")]
  NotRelative(PathBuf),

  #[error("path escapes its root: {0}")]
  Escapes(PathBuf),

  #[error("path is not valid unicode: {0}")]
  NotUnicode(PathBuf),

  #[error("{path} is not under {root}")]
  NotUnderRoot { path: PathBuf, root: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativeKey(String);

impl RelativeKey {
  /// Build a key from a relative path, normalizing separators.
  pub fn from_relative_path(path: &Path) -> Result<Self, KeyError> {
    let mut parts = Vec::new();
    for component in path.components() {
      match component {
        Component::Normal(part) => {
          let part = part.to_str().ok_or_else(|| KeyError::NotUnicode(path.to_path_buf()))?;
          parts.push(part);
        }
        Component::CurDir => {}
        Component::ParentDir => return Err(KeyError::Escapes(path.to_path_buf())),
        Component::RootDir | Component::Prefix(_) => return Err(KeyError::NotRelative(path.to_path_buf())),
      }
    }

    if parts.is_empty() {
      return Err(KeyError::Empty);
    }

    Ok(Self(parts.join("/")))
  }

  /// Build the key of `path` relative to `root`.
  pub fn from_root(root: &Path, path: &Path) -> Result<Self, KeyError> {
    let relative = path.strip_prefix(root).map_err(|_| KeyError::NotUnderRoot {
      path: path.to_path_buf(),
      root: root.to_path_buf(),
    })?;
    Self::from_relative_path(relative)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Resolve the key to a path under `root`.
  pub fn resolve(&self, root: &Path) -> PathBuf {
    let mut path = root.to_path_buf();
    path.extend(self.0.split('/'));
    path
  }

  /// Append `other` below this key.
  pub fn join(&self, other: &RelativeKey) -> RelativeKey {
    RelativeKey(format!("{}/{}", self.0, other.0))
  }

  /// The key of the containing directory, if any.
  pub fn parent(&self) -> Option<RelativeKey> {
    self.0.rsplit_once('/').map(|(parent, _)| RelativeKey(parent.to_string()))
  }

  /// Last component of the key.
  pub fn file_name(&self) -> &str {
    self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, name)| name)
  }

  /// True if `prefix` is this key or one of its ancestors (component-wise).
  pub fn starts_with(&self, prefix: &RelativeKey) -> bool {
    self.0 == prefix.0 || (self.0.starts_with(&prefix.0) && self.0.as_bytes().get(prefix.0.len()) == Some(&b'/'))
  }

  /// The key with the extension of its last component removed.
  ///
  /// Archive members are placed under this prefix (`hud.zip` -> `hud`).
  pub fn without_extension(&self) -> RelativeKey {
    let name = self.file_name();
    match name.rsplit_once('.') {
      Some((stem, _)) if !stem.is_empty() => match self.parent() {
        Some(parent) => RelativeKey(format!("{}/{}", parent.0, stem)),
        None => RelativeKey(stem.to_string()),
      },
      _ => self.clone(),
    }
  }
}

impl fmt::Display for RelativeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl TryFrom<String> for RelativeKey {
  type Error = KeyError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::from_relative_path(Path::new(&value))
  }
}

impl TryFrom<&str> for RelativeKey {
  type Error = KeyError;

  fn try_from(value: &str) -> Result<Self, Self::Error> {
    Self::from_relative_path(Path::new(value))
  }
}

impl From<RelativeKey> for String {
  fn from(key: RelativeKey) -> Self {
    key.0
  }
}
