//! Archive-backed resources.
//!
//! A resource may be a container file whose members are overlaid instead of
//! the container itself. The overlay engine reaches archives only through
//! [`ArchiveOpener`] and [`ArchiveReader`]; [`ZipOpener`] is the built-in
//! implementation.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::DEFAULT_MAX_ARCHIVE_ENTRIES;
use crate::key::RelativeKey;

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("failed to open archive {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid archive {path}: {source}")]
  Format {
    path: PathBuf,
    #[source]
    source: zip::result::ZipError,
  },

  #[error("archive {path} has no entry {key}")]
  EntryNotFound { path: PathBuf, key: RelativeKey },

  #[error("archive {path} has {count} entries, more than the limit of {limit}")]
  TooManyEntries { path: PathBuf, count: usize, limit: usize },

  #[error("failed to read {key} from {path}: {source}")]
  Read {
    path: PathBuf,
    key: RelativeKey,
    #[source]
    source: std::io::Error,
  },

  #[error("no archive reader handles {0}")]
  Unsupported(PathBuf),
}

/// An opened archive.
pub trait ArchiveReader: Send {
  /// Keys of the file members, relative to the archive root.
  fn list_entries(&mut self) -> Result<Vec<RelativeKey>, ArchiveError>;

  /// Stream the bytes of one member.
  fn read_entry(&mut self, key: &RelativeKey) -> Result<Box<dyn Read + '_>, ArchiveError>;
}

/// Recognizes and opens archive files.
pub trait ArchiveOpener: Send + Sync {
  /// Whether `path` should be expanded rather than copied verbatim.
  fn handles(&self, path: &Path) -> bool;

  fn open(&self, path: &Path) -> Result<Box<dyn ArchiveReader>, ArchiveError>;
}

/// Opens `.zip` files.
#[derive(Debug, Clone)]
pub struct ZipOpener {
  max_entries: usize,
}

impl ZipOpener {
  pub fn new(max_entries: usize) -> Self {
    Self { max_entries }
  }
}

impl Default for ZipOpener {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_ARCHIVE_ENTRIES)
  }
}

impl ArchiveOpener for ZipOpener {
  fn handles(&self, path: &Path) -> bool {
    path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
  }

  fn open(&self, path: &Path) -> Result<Box<dyn ArchiveReader>, ArchiveError> {
    let file = File::open(path).map_err(|e| ArchiveError::Open {
      path: path.to_path_buf(),
      source: e,
    })?;
    let archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| ArchiveError::Format {
      path: path.to_path_buf(),
      source: e,
    })?;

    if archive.len() > self.max_entries {
      return Err(ArchiveError::TooManyEntries {
        path: path.to_path_buf(),
        count: archive.len(),
        limit: self.max_entries,
      });
    }

    debug!(path = %path.display(), entries = archive.len(), "opened zip archive");
    Ok(Box::new(ZipReader {
      path: path.to_path_buf(),
      archive,
      index: None,
    }))
  }
}

struct ZipReader {
  path: PathBuf,
  archive: zip::ZipArchive<BufReader<File>>,
  index: Option<HashMap<RelativeKey, usize>>,
}

impl ZipReader {
  fn build_index(&mut self) -> Result<&HashMap<RelativeKey, usize>, ArchiveError> {
    if self.index.is_none() {
      let mut index = HashMap::new();
      for i in 0..self.archive.len() {
        let file = self.archive.by_index(i).map_err(|e| ArchiveError::Format {
          path: self.path.clone(),
          source: e,
        })?;
        if file.is_dir() {
          continue;
        }
        let Some(name) = file.enclosed_name() else {
          warn!(archive = %self.path.display(), entry = file.name(), "skipping unsafe entry name");
          continue;
        };
        match RelativeKey::from_relative_path(&name) {
          Ok(key) => {
            index.entry(key).or_insert(i);
          }
          Err(e) => warn!(archive = %self.path.display(), entry = file.name(), error = %e, "skipping entry"),
        }
      }
      self.index = Some(index);
    }
    Ok(self.index.get_or_insert_with(HashMap::new))
  }
}

impl ArchiveReader for ZipReader {
  fn list_entries(&mut self) -> Result<Vec<RelativeKey>, ArchiveError> {
    let mut keys: Vec<_> = self.build_index()?.keys().cloned().collect();
    keys.sort();
    Ok(keys)
  }

  fn read_entry(&mut self, key: &RelativeKey) -> Result<Box<dyn Read + '_>, ArchiveError> {
    let found = self.build_index()?.get(key).copied();
    let path = self.path.clone();
    let Some(index) = found else {
      return Err(ArchiveError::EntryNotFound { path, key: key.clone() });
    };
    let file = self
      .archive
      .by_index(index)
      .map_err(|e| ArchiveError::Format { path, source: e })?;
    Ok(Box::new(file))
  }
}
