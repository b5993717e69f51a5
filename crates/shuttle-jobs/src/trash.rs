//! Trash bin access.

use std::io;
use std::path::Path;

/// Somewhere entries go instead of being deleted outright.
pub trait TrashBin: Send + Sync {
    /// Move `path` (and everything below it) into the bin.
    fn trash(&self, path: &Path) -> io::Result<()>;
}

/// The desktop's trash bin, via the `trash` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTrash;

impl TrashBin for SystemTrash {
    fn trash(&self, path: &Path) -> io::Result<()> {
        trash::delete(path).map_err(|e| io::Error::other(e.to_string()))
    }
}
