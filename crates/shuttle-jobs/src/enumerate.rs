//! Source enumeration into an ordered work list.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use jwalk::{Parallelism, WalkDir};
use shuttle_core::{EntryType, ErrorKind, JobError, WorkItem};

use crate::recovery::{IoStage, classify};

/// How far a top-level directory is listed up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recursion {
    /// List every descendant now.
    Full,
    /// List children only if the directory has to be copied piecewise.
    Lazy,
    /// Never list children; the entry is handled as a whole.
    Shallow,
}

/// Lists sources into pre-order work items.
#[derive(Debug, Clone, Copy)]
pub struct Enumerator {
    follow_symlinks: bool,
}

impl Enumerator {
    pub fn new(follow_symlinks: bool) -> Self {
        Self { follow_symlinks }
    }

    fn stat(&self, path: &Path) -> io::Result<fs::Metadata> {
        if self.follow_symlinks {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        }
    }

    /// Enumerate one top-level source.
    ///
    /// A missing source is returned as an error; every other failure is
    /// attached to the affected item.
    pub fn enumerate(
        &self,
        source: &Path,
        destination: PathBuf,
        recursion: Recursion,
    ) -> Result<Vec<WorkItem>, JobError> {
        let metadata = match self.stat(source) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(JobError::new(ErrorKind::SourceNotFound, source, e.to_string()));
            }
            Err(e) => {
                let mut item = WorkItem::new(source, destination, EntryType::File, 0, 0);
                item.error = Some(classify(IoStage::Stat, source, &e));
                return Ok(vec![item]);
            }
        };

        let entry = EntryType::from_file_type(metadata.file_type());
        let size = if entry.is_file() { metadata.len() } else { 0 };
        let mut root = WorkItem::new(source, destination.clone(), entry, size, 0);

        if !entry.is_dir() || recursion == Recursion::Lazy {
            return Ok(vec![root]);
        }
        root.expanded = true;
        if recursion == Recursion::Shallow {
            return Ok(vec![root]);
        }

        match self.walk(source, &destination, 0) {
            Ok(children) => {
                let mut items = Vec::with_capacity(children.len() + 1);
                items.push(root);
                items.extend(children);
                Ok(items)
            }
            Err(err) => {
                root.error = Some(err);
                Ok(vec![root])
            }
        }
    }

    /// List the children of the directory at `index` and splice them in
    /// right after it.
    ///
    /// Returns the number of items and bytes added.
    pub fn expand(&self, items: &mut Vec<WorkItem>, index: usize) -> Result<(usize, u64), JobError> {
        let (source, destination, depth) = {
            let item = &items[index];
            (item.source.clone(), item.destination.clone(), item.depth)
        };

        let children = self.walk(&source, &destination, depth)?;
        let count = children.len();
        let bytes = children.iter().map(|c| c.size).sum();

        items[index].expanded = true;
        items.splice(index + 1..index + 1, children);

        tracing::debug!(path = %source.display(), count, bytes, "expanded directory");
        Ok((count, bytes))
    }

    /// Walk below `source`, skipping the root itself.
    ///
    /// Fails only when the root cannot be listed.
    fn walk(&self, source: &Path, destination: &Path, base_depth: usize) -> Result<Vec<WorkItem>, JobError> {
        let walker = WalkDir::new(source)
            .parallelism(Parallelism::Serial)
            .sort(true)
            .skip_hidden(false)
            .follow_links(self.follow_symlinks);

        let mut items: Vec<WorkItem> = Vec::new();
        // Paths that got an item from an error before the walk reached them.
        let mut orphans: HashSet<PathBuf> = HashSet::new();

        for entry_result in walker {
            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
                    let error = walk_error(&err, &path);
                    if path == source {
                        return Err(error);
                    }
                    if attach_error(&mut items, source, destination, base_depth, &path, error) {
                        orphans.insert(path);
                    }
                    continue;
                }
            };

            let path = entry.path();
            let children_error = entry
                .read_children_error
                .as_ref()
                .map(|err| walk_error(err, &path));

            if entry.depth() == 0 {
                if let Some(error) = children_error {
                    return Err(error);
                }
                continue;
            }

            let Ok(relative) = path.strip_prefix(source) else {
                continue;
            };

            if !orphans.remove(&path) {
                let kind = EntryType::from_file_type(entry.file_type());
                let mut item = WorkItem::new(
                    &path,
                    destination.join(relative),
                    kind,
                    0,
                    base_depth + entry.depth(),
                );
                if kind.is_file() {
                    match entry.metadata() {
                        Ok(metadata) => item.size = metadata.len(),
                        Err(err) => item.error = Some(walk_error(&err, &path)),
                    }
                }
                items.push(item);
            }

            if let Some(error) = children_error {
                attach_error(&mut items, source, destination, base_depth, &path, error);
            }
        }

        Ok(items)
    }
}

fn walk_error(err: &jwalk::Error, path: &Path) -> JobError {
    match err.io_error() {
        Some(io_err) => classify(IoStage::Traverse, path, io_err),
        None => JobError::new(ErrorKind::NoTraversePermission, path, err.to_string()),
    }
}

/// Record an error against the item for `path`.
///
/// Returns true when the walk had not produced that item yet and one was
/// added for it.
fn attach_error(
    items: &mut Vec<WorkItem>,
    source: &Path,
    destination: &Path,
    base_depth: usize,
    path: &Path,
    error: JobError,
) -> bool {
    if let Some(item) = items.iter_mut().rev().find(|i| i.source == path) {
        if item.error.is_none() {
            item.error = Some(error);
        }
        return false;
    }

    let Ok(relative) = path.strip_prefix(source) else {
        tracing::warn!(path = %path.display(), "walk error outside the source tree");
        return false;
    };
    let kind = fs::symlink_metadata(path)
        .map(|m| EntryType::from_file_type(m.file_type()))
        .unwrap_or(EntryType::File);
    let mut item = WorkItem::new(
        path,
        destination.join(relative),
        kind,
        0,
        base_depth + relative.components().count(),
    );
    item.expanded = true;
    item.error = Some(error);
    items.push(item);
    true
}

/// Index one past the last descendant of the item at `index`.
pub fn subtree_end(items: &[WorkItem], index: usize) -> usize {
    let depth = items[index].depth;
    items[index + 1..]
        .iter()
        .position(|i| i.depth <= depth)
        .map_or(items.len(), |offset| index + 1 + offset)
}

/// Destination of a top-level source copied into `target`.
pub fn destination_for(source: &Path, target: &Path) -> Option<PathBuf> {
    source.file_name().map(|name| target.join(name))
}
