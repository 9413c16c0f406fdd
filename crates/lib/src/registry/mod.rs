//! The set of known custom resources and its reconciliation with watch events.
//!
//! The registry decides set membership only. Every change it accepts becomes
//! a [`WorkItem`] on the session's [`WorkQueue`]; copying and restoring happen
//! elsewhere so that event intake never waits on the disk.
//!
//! With a recursive watch every file is its own resource. With a flat watch
//! the direct children of each root are the resources, and a child directory
//! is overlaid as a whole tree.

mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::archive::ArchiveOpener;
use crate::copy::Filter;
use crate::key::RelativeKey;
use crate::watch::{WatchEvent, WatchEventKind};

pub use types::{
  Reconciliation, RegistryError, ResourceEntry, ResourceKind, ScanReport, WorkAction, WorkItem, WorkQueue,
};

type EntryId = (usize, RelativeKey);

pub struct ResourceRegistry {
  roots: Vec<PathBuf>,
  recursive: bool,
  filter: Filter,
  archives: Arc<dyn ArchiveOpener>,
  /// Keyed by root index, then key; later roots win on overlay.
  entries: BTreeMap<EntryId, ResourceEntry>,
  queue: Option<WorkQueue>,
}

impl ResourceRegistry {
  pub fn new(roots: Vec<PathBuf>, recursive: bool, filter: Filter, archives: Arc<dyn ArchiveOpener>) -> Self {
    let roots = roots
      .into_iter()
      .map(|root| std::path::absolute(&root).unwrap_or(root))
      .collect();
    Self {
      roots,
      recursive,
      filter,
      archives,
      entries: BTreeMap::new(),
      queue: None,
    }
  }

  pub fn roots(&self) -> &[PathBuf] {
    &self.roots
  }

  pub fn is_recursive(&self) -> bool {
    self.recursive
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn get(&self, root: &Path, key: &RelativeKey) -> Option<&ResourceEntry> {
    let idx = self.roots.iter().position(|r| r == root)?;
    self.entries.get(&(idx, key.clone()))
  }

  /// Current entries, ordered by root then key.
  pub fn snapshot(&self) -> Vec<ResourceEntry> {
    self.entries.values().cloned().collect()
  }

  /// Route accepted changes to `queue` until [`end_session`](Self::end_session).
  ///
  /// Sequence numbers restart with every watch session.
  pub fn begin_session(&mut self, queue: WorkQueue) {
    for entry in self.entries.values_mut() {
      entry.last_sequence = 0;
    }
    self.queue = Some(queue);
  }

  pub fn end_session(&mut self) {
    self.queue = None;
  }

  /// Rebuild the entry set from disk.
  pub fn scan(&mut self) -> ScanReport {
    let mut report = ScanReport::default();
    let mut entries = BTreeMap::new();

    for (idx, root) in self.roots.iter().enumerate() {
      let max_depth = if self.recursive { usize::MAX } else { 1 };
      let filter = &self.filter;
      let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !entry.file_type().is_dir() || filter(entry.path()));

      for entry in walker {
        let entry = match entry {
          Ok(entry) => entry,
          Err(e) => {
            let path = e.path().unwrap_or(root).to_path_buf();
            warn!(path = %path.display(), error = %e, "scan failed");
            report.failures.push(RegistryError::Scan { path, source: e });
            continue;
          }
        };

        let kind = if entry.file_type().is_dir() {
          if self.recursive {
            continue;
          }
          ResourceKind::Directory
        } else if self.archives.handles(entry.path()) {
          ResourceKind::Archive
        } else {
          ResourceKind::File
        };

        let key = match RelativeKey::from_root(root, entry.path()) {
          Ok(key) => key,
          Err(e) => {
            report.failures.push(e.into());
            continue;
          }
        };

        let version = self
          .entries
          .get(&(idx, key.clone()))
          .map_or(0, |previous| previous.last_seen_version);
        entries.insert(
          (idx, key.clone()),
          ResourceEntry {
            root: root.clone(),
            source_path: entry.into_path(),
            relative_key: key,
            kind,
            last_seen_version: version,
            last_sequence: 0,
          },
        );
      }
    }

    self.entries = entries;
    report.entries = self.entries.len();
    debug!(entries = report.entries, failures = report.failures.len(), "scanned resources");
    report
  }

  /// Fold one watch event into the entry set.
  pub fn reconcile(&mut self, event: &WatchEvent) -> Reconciliation {
    let idx = match self.roots.iter().position(|r| *r == event.root) {
      Some(idx) => idx,
      None => match self.root_index(&event.path) {
        Some(idx) => idx,
        None => {
          trace!(path = %event.path.display(), "event outside known roots");
          return Reconciliation::Ignored;
        }
      },
    };

    match self.handle(idx, &event.path, event.kind, Some(event.sequence)) {
      Ok(outcome) => outcome,
      Err(e) => {
        warn!(path = %event.path.display(), error = %e, "could not reconcile event");
        Reconciliation::Ignored
      }
    }
  }

  /// Register `path` directly, as if it had just been created.
  pub fn add_path(&mut self, path: &Path) -> Result<Reconciliation, RegistryError> {
    self.direct(path, WatchEventKind::Created)
  }

  /// Re-apply `path` directly, as if it had just been modified.
  pub fn update_path(&mut self, path: &Path) -> Result<Reconciliation, RegistryError> {
    self.direct(path, WatchEventKind::Modified)
  }

  /// Forget `path` directly, as if it had just been deleted.
  pub fn remove_path(&mut self, path: &Path) -> Result<Reconciliation, RegistryError> {
    self.direct(path, WatchEventKind::Deleted)
  }

  fn direct(&mut self, path: &Path, kind: WatchEventKind) -> Result<Reconciliation, RegistryError> {
    let path = std::path::absolute(path).map_err(|e| RegistryError::Resolve {
      path: path.to_path_buf(),
      source: e,
    })?;
    let idx = self
      .root_index(&path)
      .ok_or_else(|| RegistryError::OutsideRoots(path.clone()))?;
    self.handle(idx, &path, kind, None)
  }

  fn root_index(&self, path: &Path) -> Option<usize> {
    self
      .roots
      .iter()
      .enumerate()
      .filter(|(_, root)| path.starts_with(root))
      .max_by_key(|(_, root)| root.as_os_str().len())
      .map(|(idx, _)| idx)
  }

  fn handle(
    &mut self,
    idx: usize,
    path: &Path,
    kind: WatchEventKind,
    sequence: Option<u64>,
  ) -> Result<Reconciliation, RegistryError> {
    let root = self.roots[idx].clone();
    if path == root {
      return Ok(match kind {
        WatchEventKind::Deleted => self.remove_root(idx),
        _ => Reconciliation::Ignored,
      });
    }

    let key = RelativeKey::from_root(&root, path)?;
    if self.is_excluded(&root, path) {
      trace!(key = %key, "excluded by filter");
      return Ok(Reconciliation::Ignored);
    }

    if let Some(container) = self.container_of(idx, &key) {
      return Ok(self.member_event(idx, container, path, key, kind, sequence));
    }

    Ok(match kind {
      WatchEventKind::Deleted => self.remove_key(idx, key, sequence),
      WatchEventKind::Created | WatchEventKind::Modified => self.upsert(idx, path, key, sequence),
    })
  }

  /// True if the filter rejects `path` (when it is a directory) or any
  /// directory between it and `root`.
  fn is_excluded(&self, root: &Path, path: &Path) -> bool {
    if path.is_dir() && !(self.filter)(path) {
      return true;
    }
    path
      .ancestors()
      .skip(1)
      .take_while(|ancestor| ancestor.starts_with(root))
      .any(|ancestor| !(self.filter)(ancestor))
  }

  /// The directory resource that contains `key`, if any.
  fn container_of(&self, idx: usize, key: &RelativeKey) -> Option<RelativeKey> {
    let mut current = key.parent();
    while let Some(candidate) = current {
      if let Some(entry) = self.entries.get(&(idx, candidate.clone()))
        && entry.kind == ResourceKind::Directory
      {
        return Some(candidate);
      }
      current = candidate.parent();
    }
    None
  }

  fn classify(&self, path: &Path) -> Option<ResourceKind> {
    let metadata = std::fs::metadata(path).ok()?;
    Some(if metadata.is_dir() {
      ResourceKind::Directory
    } else if self.archives.handles(path) {
      ResourceKind::Archive
    } else {
      ResourceKind::File
    })
  }

  fn upsert(&mut self, idx: usize, path: &Path, key: RelativeKey, sequence: Option<u64>) -> Reconciliation {
    let Some(kind) = self.classify(path) else {
      trace!(key = %key, "path vanished before reconciliation");
      return Reconciliation::Ignored;
    };
    if kind == ResourceKind::Directory && self.recursive {
      // Its files arrive as events of their own.
      return Reconciliation::Ignored;
    }

    let shadowed = self.shadowed(idx, &key);
    let id = (idx, key.clone());
    match self.entries.get_mut(&id) {
      Some(entry) => {
        if let Some(sequence) = sequence {
          if sequence <= entry.last_sequence {
            debug!(key = %key, sequence, last = entry.last_sequence, "discarding stale event");
            return Reconciliation::Stale { key, sequence };
          }
          entry.last_sequence = sequence;
        }
        entry.last_seen_version += 1;
        entry.kind = kind;
        entry.source_path = path.to_path_buf();
        let version = entry.last_seen_version;
        let item = apply_item(entry);
        debug!(key = %key, version, shadowed, "resource updated");
        if !shadowed {
          self.enqueue(item);
        }
        Reconciliation::Updated { key, version }
      }
      None => {
        let entry = ResourceEntry {
          root: self.roots[idx].clone(),
          source_path: path.to_path_buf(),
          relative_key: key.clone(),
          kind,
          last_seen_version: 0,
          last_sequence: sequence.unwrap_or(0),
        };
        let item = apply_item(&entry);
        self.entries.insert(id, entry);
        debug!(key = %key, ?kind, shadowed, "resource added");
        if !shadowed {
          self.enqueue(item);
        }
        Reconciliation::Added(key)
      }
    }
  }

  fn remove_key(&mut self, idx: usize, key: RelativeKey, sequence: Option<u64>) -> Reconciliation {
    let id = (idx, key.clone());
    if let Some(entry) = self.entries.get(&id)
      && let Some(sequence) = sequence
      && sequence <= entry.last_sequence
    {
      debug!(key = %key, sequence, last = entry.last_sequence, "discarding stale event");
      return Reconciliation::Stale { key, sequence };
    }

    if let Some(entry) = self.entries.remove(&id) {
      self.after_removal(vec![entry]);
      return Reconciliation::Removed(vec![key]);
    }

    // A deleted directory takes every resource below it along.
    let below: Vec<EntryId> = self
      .entries
      .keys()
      .filter(|(i, k)| *i == idx && k.starts_with(&key))
      .cloned()
      .collect();
    if below.is_empty() {
      return Reconciliation::Ignored;
    }
    let removed: Vec<ResourceEntry> = below.iter().filter_map(|id| self.entries.remove(id)).collect();
    let keys = removed.iter().map(|e| e.relative_key.clone()).collect();
    self.after_removal(removed);
    Reconciliation::Removed(keys)
  }

  fn remove_root(&mut self, idx: usize) -> Reconciliation {
    let ids: Vec<EntryId> = self.entries.keys().filter(|(i, _)| *i == idx).cloned().collect();
    let removed: Vec<ResourceEntry> = ids.iter().filter_map(|id| self.entries.remove(id)).collect();
    warn!(root = %self.roots[idx].display(), resources = removed.len(), "watched root removed");
    let keys = removed.iter().map(|e| e.relative_key.clone()).collect();
    self.after_removal(removed);
    Reconciliation::Removed(keys)
  }

  /// True if a later root also has a resource at `key`. Later roots win, so
  /// changes to this one must not reach the target.
  fn shadowed(&self, idx: usize, key: &RelativeKey) -> bool {
    self.entries.keys().any(|(i, k)| *i > idx && k == key)
  }

  /// Queue restores for removed entries, then re-apply any other root's
  /// resource that the removed one had been covering.
  fn after_removal(&mut self, removed: Vec<ResourceEntry>) {
    for entry in removed {
      let idx = self.roots.iter().position(|root| *root == entry.root).unwrap_or(0);
      if self.shadowed(idx, &entry.relative_key) {
        debug!(key = %entry.relative_key, "shadowed resource removed");
        continue;
      }
      debug!(key = %entry.relative_key, "resource removed");
      self.enqueue(restore_item(&entry));

      let shadowed = self
        .entries
        .values()
        .filter(|other| other.relative_key == entry.relative_key)
        .next_back()
        .map(apply_item);
      if let Some(item) = shadowed {
        self.enqueue(item);
      }
    }
  }

  fn member_event(
    &mut self,
    idx: usize,
    container: RelativeKey,
    path: &Path,
    key: RelativeKey,
    kind: WatchEventKind,
    sequence: Option<u64>,
  ) -> Reconciliation {
    let shadowed = self.shadowed(idx, &container);
    let Some(entry) = self.entries.get_mut(&(idx, container.clone())) else {
      return Reconciliation::Ignored;
    };
    if let Some(sequence) = sequence {
      if sequence <= entry.last_sequence {
        return Reconciliation::Stale { key, sequence };
      }
      entry.last_sequence = sequence;
    }

    let item = match kind {
      WatchEventKind::Deleted => WorkItem {
        route: container,
        action: WorkAction::RestorePrefix(key.clone()),
      },
      WatchEventKind::Created | WatchEventKind::Modified if path.is_file() => WorkItem {
        route: container,
        action: WorkAction::ApplyFile {
          source: path.to_path_buf(),
          key: key.clone(),
        },
      },
      WatchEventKind::Created | WatchEventKind::Modified if path.is_dir() => {
        entry.last_seen_version += 1;
        apply_item(entry)
      }
      _ => return Reconciliation::Ignored,
    };

    if shadowed {
      trace!(key = %key, "member of a shadowed resource");
    } else {
      self.enqueue(item);
    }
    match kind {
      WatchEventKind::Deleted => Reconciliation::MemberRemoved(key),
      _ => Reconciliation::MemberChanged(key),
    }
  }

  fn enqueue(&self, item: WorkItem) {
    let Some(queue) = &self.queue else {
      return;
    };
    if queue.send(item).is_err() {
      warn!("overlay executor is gone; dropping work item");
    }
  }
}

fn apply_item(entry: &ResourceEntry) -> WorkItem {
  WorkItem {
    route: entry.relative_key.clone(),
    action: WorkAction::ApplyEntry(entry.clone()),
  }
}

fn restore_item(entry: &ResourceEntry) -> WorkItem {
  let action = match entry.kind {
    ResourceKind::File => WorkAction::RestoreKey(entry.relative_key.clone()),
    ResourceKind::Archive => WorkAction::RestorePrefix(entry.relative_key.without_extension()),
    ResourceKind::Directory => WorkAction::RestorePrefix(entry.relative_key.clone()),
  };
  WorkItem {
    route: entry.relative_key.clone(),
    action,
  }
}
