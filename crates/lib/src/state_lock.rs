//! Advisory lock on the state directory.
//!
//! Only one process may own a target's backup manifest at a time. Commands
//! that modify the target take an exclusive lock; `status` takes a shared one.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const LOCK_FILENAME: &str = ".lock";
const LOCK_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Written into the lock file by the exclusive holder.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub state_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum StateLockError {
  #[error(
    "state directory is in use by `{command}` (PID {pid}, started at unix time {started_at_unix})\n\
     if no respack process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    command: String,
    pid: u32,
    started_at_unix: u64,
    lock_path: PathBuf,
  },

  #[error(
    "state directory is in use by another process\n\
     if no respack process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to create state directory {path}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file {path}")]
  OpenFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock metadata")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock")]
  LockFailed(#[source] io::Error),
}

/// Held for as long as the process works on the state directory; released on drop.
#[derive(Debug)]
pub struct StateLock {
  file: File,
  lock_path: PathBuf,
}

impl StateLock {
  pub fn acquire(state_dir: &Path, mode: LockMode, command: &str) -> Result<Self, StateLockError> {
    std::fs::create_dir_all(state_dir).map_err(|source| StateLockError::CreateDir {
      path: state_dir.to_path_buf(),
      source,
    })?;

    let lock_path = state_dir.join(LOCK_FILENAME);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(|source| StateLockError::OpenFile {
        path: lock_path.clone(),
        source,
      })?;

    if let Err(err) = try_lock(&file, mode) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(contention_error(&lock_path));
      }
      return Err(StateLockError::LockFailed(err));
    }

    if mode == LockMode::Exclusive {
      write_metadata(&file, command, state_dir)?;
    }
    debug!(path = %lock_path.display(), ?mode, "state lock acquired");

    Ok(Self { file, lock_path })
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  /// Read the metadata through the held handle.
  ///
  /// Opening the file again would fail on Windows, where the lock is mandatory.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }
}

fn write_metadata(file: &File, command: &str, state_dir: &Path) -> Result<(), StateLockError> {
  let metadata = LockMetadata {
    version: LOCK_VERSION,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
    state_dir: state_dir.to_path_buf(),
  };

  file.set_len(0).map_err(StateLockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| StateLockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(StateLockError::WriteMetadata)
}

fn contention_error(lock_path: &Path) -> StateLockError {
  let metadata = std::fs::read_to_string(lock_path)
    .ok()
    .and_then(|contents| serde_json::from_str::<LockMetadata>(&contents).ok());

  match metadata {
    Some(metadata) => StateLockError::Contention {
      command: metadata.command,
      pid: metadata.pid,
      started_at_unix: metadata.started_at_unix,
      lock_path: lock_path.to_path_buf(),
    },
    None => StateLockError::ContentionUnknown {
      lock_path: lock_path.to_path_buf(),
    },
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: a zeroed OVERLAPPED is valid and the handle outlives the call.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
