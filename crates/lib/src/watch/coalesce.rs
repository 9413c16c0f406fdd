//! Burst coalescing keyed by path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use super::types::WatchEventKind;

struct Pending {
  kind: WatchEventKind,
  deadline: Instant,
  arrival: u64,
}

/// Holds the latest kind per path until its window closes.
///
/// The window starts at the first notification for a path and is not
/// extended by later ones, so a continuously rewritten file still produces
/// an event every window.
pub(super) struct Coalescer {
  window: Duration,
  pending: HashMap<PathBuf, Pending>,
  arrivals: u64,
}

impl Coalescer {
  pub fn new(window: Duration) -> Self {
    Self {
      window,
      pending: HashMap::new(),
      arrivals: 0,
    }
  }

  pub fn push(&mut self, path: PathBuf, kind: WatchEventKind, now: Instant) {
    match self.pending.get_mut(&path) {
      Some(pending) => pending.kind = kind,
      None => {
        self.arrivals += 1;
        self.pending.insert(
          path,
          Pending {
            kind,
            deadline: now + self.window,
            arrival: self.arrivals,
          },
        );
      }
    }
  }

  pub fn next_deadline(&self) -> Option<Instant> {
    self.pending.values().map(|p| p.deadline).min()
  }

  /// Remove and return every event whose window has closed, in arrival order.
  pub fn drain_due(&mut self, now: Instant) -> Vec<(PathBuf, WatchEventKind)> {
    let due: Vec<PathBuf> = self
      .pending
      .iter()
      .filter(|(_, p)| p.deadline <= now)
      .map(|(path, _)| path.clone())
      .collect();

    let mut drained: Vec<_> = due
      .into_iter()
      .filter_map(|path| self.pending.remove(&path).map(|p| (p.arrival, path, p.kind)))
      .collect();
    drained.sort_by_key(|(arrival, _, _)| *arrival);
    drained.into_iter().map(|(_, path, kind)| (path, kind)).collect()
  }

  /// Drop pending events at or below `prefix`.
  pub fn purge_under(&mut self, prefix: &Path) {
    self.pending.retain(|path, _| !path.starts_with(prefix));
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }
}
