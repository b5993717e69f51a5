//! Per-entry filesystem work: chunked copies, renames, links and removal.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use filetime::FileTime;
use shuttle_core::{ErrorKind, FAT_FILE_SIZE_LIMIT, JobError, JobOptions, VerifyMode};
use tokio_util::sync::CancellationToken;

use crate::classify::VolumeProbe;
use crate::recovery::{IoStage, classify};

/// Result of a file copy that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Written and verified.
    Copied(u64),
    /// Stopped between chunks; the partial file is gone.
    Cancelled,
}

/// Why a rename did not happen.
#[derive(Debug)]
pub enum RenameError {
    /// Source and destination are on different devices.
    CrossDevice,
    Failed(JobError),
}

/// Where copied file contents are written.
pub trait DestinationOpener: Send + Sync {
    /// Create `path`, failing if anything already exists there.
    fn create_new(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;
}

/// Plain files on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOpener;

impl DestinationOpener for LocalOpener {
    fn create_new(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Box::new(file))
    }
}

/// Performs filesystem work for single entries.
pub struct Transferrer {
    probe: Arc<dyn VolumeProbe>,
    opener: Arc<dyn DestinationOpener>,
    options: JobOptions,
}

impl Transferrer {
    pub fn new(probe: Arc<dyn VolumeProbe>, options: JobOptions) -> Self {
        Self {
            probe,
            opener: Arc::new(LocalOpener),
            options,
        }
    }

    /// Write file contents through a different opener.
    pub fn with_opener(mut self, opener: Arc<dyn DestinationOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Checks run before any byte of a file is written to `dest`.
    pub fn preflight_file(&self, dest: &Path, size: u64) -> Result<(), JobError> {
        let volume = self
            .probe
            .volume(dest)
            .map_err(|e| classify(IoStage::Stat, dest, &e))?;

        if volume.read_only {
            return Err(JobError::new(
                ErrorKind::ReadOnlyTarget,
                dest,
                "the target folder is read-only",
            ));
        }

        let limit = volume.file_size_limit.or_else(|| {
            self.options
                .is_capped_target(dest)
                .then_some(FAT_FILE_SIZE_LIMIT)
        });
        if let Some(limit) = limit {
            if size >= limit {
                return Err(JobError::new(
                    ErrorKind::FileTooLarge,
                    dest,
                    format!("{size} bytes does not fit under the {limit} byte file limit"),
                ));
            }
        }

        if let Some(available) = volume.available_bytes {
            if available < size {
                return Err(JobError::new(
                    ErrorKind::InsufficientSpace,
                    dest,
                    format!("{size} bytes needed, {available} available"),
                ));
            }
        }

        Ok(())
    }

    /// Copy a regular file in chunks, checking `cancel` before each one.
    ///
    /// `on_chunk` receives the byte count of every chunk written. Any failure
    /// or cancellation removes the partially written destination. Sources
    /// that are not regular files are refused before they are opened.
    pub fn copy_file(
        &self,
        source: &Path,
        dest: &Path,
        cancel: &CancellationToken,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<CopyOutcome, JobError> {
        let metadata = fs::metadata(source).map_err(|e| classify(IoStage::Stat, source, &e))?;
        if !metadata.is_file() {
            return Err(JobError::new(
                ErrorKind::Unsupported,
                source,
                "not a regular file, directory or link",
            ));
        }
        self.preflight_file(dest, metadata.len())?;

        let mut reader = File::open(source).map_err(|e| classify(IoStage::Open, source, &e))?;
        let mut writer = self
            .opener
            .create_new(dest)
            .map_err(|e| classify(IoStage::Create, dest, &e))?;

        let written = self.write_chunks(&mut reader, writer.as_mut(), source, dest, cancel, on_chunk);
        drop(writer);

        let result = written.and_then(|copied| match copied {
            Some((bytes, digest)) => self.verify_copy(dest, bytes, digest).map(|()| Some(bytes)),
            None => Ok(None),
        });

        match result {
            Ok(Some(bytes)) => {
                self.apply_metadata(&metadata, dest);
                Ok(CopyOutcome::Copied(bytes))
            }
            Ok(None) => {
                tracing::info!(path = %dest.display(), "copy cancelled, removing partial file");
                remove_partial(dest);
                Ok(CopyOutcome::Cancelled)
            }
            Err(err) => {
                remove_partial(dest);
                Err(err)
            }
        }
    }

    /// Pump `reader` into `writer`. Returns the byte count and, when
    /// checksums are on, the digest of what was read; `None` if cancelled.
    fn write_chunks(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        source: &Path,
        dest: &Path,
        cancel: &CancellationToken,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<Option<(u64, Option<blake3::Hash>)>, JobError> {
        let mut buffer = vec![0u8; self.options.effective_chunk_size()];
        let mut hasher = (self.options.verify == VerifyMode::Checksum).then(blake3::Hasher::new);
        let mut copied = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify(IoStage::Read, source, &e)),
            };

            writer
                .write_all(&buffer[..read])
                .map_err(|e| classify(IoStage::Write, dest, &e))?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&buffer[..read]);
            }

            copied += read as u64;
            on_chunk(read as u64);
        }

        writer.flush().map_err(|e| classify(IoStage::Write, dest, &e))?;
        Ok(Some((copied, hasher.map(|h| h.finalize()))))
    }

    /// Check the file at `dest` against what was written to it.
    ///
    /// The length must equal `expected_len`; with a `digest`, the contents
    /// are read back and hashed too.
    pub fn verify_copy(
        &self,
        dest: &Path,
        expected_len: u64,
        digest: Option<blake3::Hash>,
    ) -> Result<(), JobError> {
        let written = fs::metadata(dest)
            .map_err(|e| classify(IoStage::Stat, dest, &e))?
            .len();
        if written != expected_len {
            return Err(JobError::new(
                ErrorKind::IntegrityDamaged,
                dest,
                format!("wrote {expected_len} bytes but the destination holds {written}"),
            ));
        }

        if let Some(expected) = digest {
            let mut file = File::open(dest).map_err(|e| classify(IoStage::Open, dest, &e))?;
            let mut check = blake3::Hasher::new();
            io::copy(&mut file, &mut check).map_err(|e| classify(IoStage::Read, dest, &e))?;
            let actual = check.finalize();
            if actual != expected {
                return Err(JobError::new(
                    ErrorKind::IntegrityDamaged,
                    dest,
                    format!("checksum mismatch: expected {}, found {}", expected.to_hex(), actual.to_hex()),
                ));
            }
        }
        Ok(())
    }

    /// Recreate the symbolic link at `source` as `dest`.
    pub fn copy_symlink(&self, source: &Path, dest: &Path) -> Result<(), JobError> {
        let link = fs::read_link(source).map_err(|e| classify(IoStage::Read, source, &e))?;
        make_symlink(source, &link, dest).map_err(|e| classify(IoStage::Symlink, dest, &e))?;

        if self.options.preserve_timestamps {
            if let Ok(metadata) = fs::symlink_metadata(source) {
                let atime = FileTime::from_last_access_time(&metadata);
                let mtime = FileTime::from_last_modification_time(&metadata);
                if let Err(e) = filetime::set_symlink_file_times(dest, atime, mtime) {
                    tracing::debug!(path = %dest.display(), error = %e, "could not set link times");
                }
            }
        }
        Ok(())
    }

    pub fn create_dir(&self, dest: &Path) -> Result<(), JobError> {
        fs::create_dir(dest).map_err(|e| classify(IoStage::Mkdir, dest, &e))
    }

    /// Rename `source` to `dest` on one volume.
    pub fn rename(&self, source: &Path, dest: &Path) -> Result<(), RenameError> {
        match fs::rename(source, dest) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => Err(RenameError::CrossDevice),
            Err(e) => Err(RenameError::Failed(classify(IoStage::Rename, source, &e))),
        }
    }

    /// Remove a file or link.
    pub fn remove_file(&self, path: &Path) -> Result<(), JobError> {
        fs::remove_file(path).map_err(|e| classify(IoStage::Delete, path, &e))
    }

    /// Remove a directory that should be empty by now.
    pub fn remove_dir(&self, path: &Path) -> Result<(), io::Error> {
        fs::remove_dir(path)
    }

    /// Remove whatever sits at `path`, recursively for directories.
    pub fn remove_existing(&self, path: &Path) -> Result<(), JobError> {
        let metadata = fs::symlink_metadata(path).map_err(|e| classify(IoStage::Stat, path, &e))?;
        let result = if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|e| classify(IoStage::Delete, path, &e))
    }

    /// Copy permissions and times from `source` onto the directory `dest`,
    /// once its children are written.
    pub fn finish_dir(&self, source: &Path, dest: &Path) {
        match fs::metadata(source) {
            Ok(metadata) => self.apply_metadata(&metadata, dest),
            Err(e) => tracing::debug!(path = %source.display(), error = %e, "source directory gone"),
        }
    }

    fn apply_metadata(&self, metadata: &fs::Metadata, dest: &Path) {
        if self.options.preserve_timestamps {
            let atime = FileTime::from_last_access_time(metadata);
            let mtime = FileTime::from_last_modification_time(metadata);
            if let Err(e) = filetime::set_file_times(dest, atime, mtime) {
                tracing::warn!(path = %dest.display(), error = %e, "could not preserve timestamps");
            }
        }
        if self.options.preserve_permissions {
            if let Err(e) = fs::set_permissions(dest, metadata.permissions()) {
                tracing::warn!(path = %dest.display(), error = %e, "could not preserve permissions");
            }
        }
    }
}

fn remove_partial(dest: &Path) {
    if let Err(e) = fs::remove_file(dest) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %dest.display(), error = %e, "could not remove partial file");
        }
    }
}

#[cfg(unix)]
fn make_symlink(_source: &Path, link: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, dest)
}

#[cfg(windows)]
fn make_symlink(source: &Path, link: &Path, dest: &Path) -> io::Result<()> {
    if fs::metadata(source).is_ok_and(|m| m.is_dir()) {
        std::os::windows::fs::symlink_dir(link, dest)
    } else {
        std::os::windows::fs::symlink_file(link, dest)
    }
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_source: &Path, _link: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}
