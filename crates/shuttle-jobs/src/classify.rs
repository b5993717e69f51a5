//! Volume probing and source/target placement.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shuttle_core::{ErrorKind, FAT_FILE_SIZE_LIMIT, JobError};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// What a transfer needs to know about the volume holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeInfo {
    /// Device id; equal ids mean a rename can stay on one volume.
    pub device: u64,
    /// Free bytes available to this process, if known.
    pub available_bytes: Option<u64>,
    /// Largest file the filesystem accepts, if it has a ceiling.
    pub file_size_limit: Option<u64>,
    pub read_only: bool,
}

/// Reports volume facts for a path.
///
/// Paths that do not exist yet are answered for their nearest existing
/// ancestor.
pub trait VolumeProbe: Send + Sync {
    fn volume(&self, path: &Path) -> io::Result<VolumeInfo>;
}

/// Probe backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalVolumeProbe;

impl VolumeProbe for LocalVolumeProbe {
    fn volume(&self, path: &Path) -> io::Result<VolumeInfo> {
        let existing = nearest_existing(path)?;
        let metadata = fs::metadata(&existing)?;

        let mut info = VolumeInfo {
            device: get_dev(&metadata),
            available_bytes: None,
            file_size_limit: None,
            read_only: metadata.is_dir() && metadata.permissions().readonly(),
        };

        if let Some(stats) = fs_stats(&existing) {
            info.available_bytes = Some(stats.available_bytes);
            info.read_only |= stats.read_only;
            if stats.fat {
                info.file_size_limit = Some(FAT_FILE_SIZE_LIMIT);
            }
        }

        Ok(info)
    }
}

fn nearest_existing(path: &Path) -> io::Result<PathBuf> {
    path.ancestors()
        .filter(|p| !p.as_os_str().is_empty())
        .find(|p| fs::metadata(p).is_ok())
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no existing ancestor for {}", path.display()),
            )
        })
}

struct FsStats {
    available_bytes: u64,
    read_only: bool,
    fat: bool,
}

#[cfg(unix)]
fn fs_stats(path: &Path) -> Option<FsStats> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;

    // SAFETY: c_path is NUL-terminated and stat is a plain C struct.
    let stat = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return None;
        }
        stat
    };

    #[allow(clippy::unnecessary_cast, reason = "statvfs field types vary across platforms")]
    let available_bytes = (stat.f_bavail as u64) * (stat.f_frsize as u64);
    #[allow(clippy::unnecessary_cast, reason = "statvfs field types vary across platforms")]
    let read_only = (stat.f_flag as u64) & (libc::ST_RDONLY as u64) != 0;

    Some(FsStats {
        available_bytes,
        read_only,
        fat: is_fat(&c_path),
    })
}

#[cfg(not(unix))]
fn fs_stats(_path: &Path) -> Option<FsStats> {
    None
}

#[cfg(target_os = "linux")]
fn is_fat(c_path: &std::ffi::CStr) -> bool {
    const MSDOS_SUPER_MAGIC: i64 = 0x4d44;

    // SAFETY: c_path is NUL-terminated and stat is a plain C struct.
    unsafe {
        let mut stat: libc::statfs = std::mem::zeroed();
        if libc::statfs(c_path.as_ptr(), &mut stat) != 0 {
            return false;
        }
        #[allow(clippy::unnecessary_cast, reason = "f_type width varies across targets")]
        let fs_type = stat.f_type as i64;
        fs_type == MSDOS_SUPER_MAGIC
    }
}

#[cfg(target_os = "macos")]
fn is_fat(c_path: &std::ffi::CStr) -> bool {
    // SAFETY: c_path is NUL-terminated; f_fstypename is a NUL-terminated C string.
    unsafe {
        let mut stat: libc::statfs = std::mem::zeroed();
        if libc::statfs(c_path.as_ptr(), &mut stat) != 0 {
            return false;
        }
        std::ffi::CStr::from_ptr(stat.f_fstypename.as_ptr()).to_bytes() == b"msdos"
    }
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "macos"))))]
fn is_fat(_c_path: &std::ffi::CStr) -> bool {
    false
}

/// Get the device ID from metadata.
#[cfg(unix)]
fn get_dev(metadata: &fs::Metadata) -> u64 {
    metadata.dev()
}

#[cfg(not(unix))]
fn get_dev(_metadata: &fs::Metadata) -> u64 {
    0
}

/// Whether two metadata records describe the same filesystem entry.
#[cfg(unix)]
pub fn same_entry(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
pub fn same_entry(_a: &fs::Metadata, _b: &fs::Metadata) -> bool {
    false
}

/// Where a source sits relative to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Same volume: a rename moves the entry.
    SameVolume,
    /// Different volumes: data has to be copied.
    CrossVolume,
}

/// Decides placement and rejects targets nested in their sources.
pub struct PathClassifier {
    probe: Arc<dyn VolumeProbe>,
    cross_devices: HashSet<(u64, u64)>,
}

impl PathClassifier {
    pub fn new(probe: Arc<dyn VolumeProbe>) -> Self {
        Self {
            probe,
            cross_devices: HashSet::new(),
        }
    }

    pub fn probe(&self) -> &Arc<dyn VolumeProbe> {
        &self.probe
    }

    fn devices(&self, source: &Path, target: &Path) -> Option<(u64, u64)> {
        let src = self.probe.volume(source).ok()?.device;
        let dst = self.probe.volume(target).ok()?.device;
        Some((src, dst))
    }

    /// Placement of `source` relative to the directory `target`.
    ///
    /// Unknown devices count as cross-volume.
    pub fn placement(&self, source: &Path, target: &Path) -> Placement {
        match self.devices(source, target) {
            Some((src, dst)) if src == dst && !self.cross_devices.contains(&(src, dst)) => {
                Placement::SameVolume
            }
            _ => Placement::CrossVolume,
        }
    }

    /// Remember that a rename between these paths crossed devices after all.
    pub fn invalidate(&mut self, source: &Path, target: &Path) {
        if let Some(pair) = self.devices(source, target) {
            tracing::debug!(
                source = %source.display(),
                target = %target.display(),
                "rename crossed devices, treating pair as cross-volume"
            );
            self.cross_devices.insert(pair);
        }
    }

    /// Fail if `target` is one of the directory sources or lies inside one.
    pub fn check_nesting(
        &self,
        sources: &[PathBuf],
        target: &Path,
        follow_symlinks: bool,
    ) -> Result<(), JobError> {
        let target = normalize(target);

        for source in sources {
            let Ok(meta) = fs::symlink_metadata(source) else {
                continue;
            };
            let is_dir = if meta.file_type().is_symlink() {
                follow_symlinks && fs::metadata(source).is_ok_and(|m| m.is_dir())
            } else {
                meta.is_dir()
            };
            if !is_dir {
                continue;
            }

            let source_path = normalize(source);
            if target.starts_with(&source_path) {
                return Err(JobError::new(
                    ErrorKind::TargetInsideSource,
                    source,
                    format!("{} is inside {}", target.display(), source_path.display()),
                ));
            }
        }
        Ok(())
    }
}

/// Canonical form of `path`, resolving the longest existing prefix.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => normalize(parent).join(name),
        _ => path.to_path_buf(),
    }
}
