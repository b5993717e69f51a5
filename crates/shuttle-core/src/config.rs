//! Job option types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::{ConflictChoice, ErrorAction};

/// How a written file is checked against its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Compare byte counts only.
    #[default]
    Size,
    /// Compare sizes and BLAKE3 digests.
    Checksum,
}

/// Options for a transfer job.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct JobOptions {
    /// Dereference symbolic links instead of recreating them.
    #[builder(default = "false")]
    pub follow_symlinks: bool,

    /// Copy permission bits onto created entries.
    #[builder(default = "true")]
    pub preserve_permissions: bool,

    /// Copy access and modification times onto created files.
    #[builder(default = "true")]
    pub preserve_timestamps: bool,

    /// Replay the first conflict decision for every later conflict.
    #[builder(default = "false")]
    pub apply_to_all_conflicts: bool,

    /// Answer every conflict with this choice without asking.
    #[builder(default, setter(strip_option))]
    pub conflict_policy: Option<ConflictChoice>,

    /// Answer every error with this action without asking.
    #[builder(default, setter(strip_option))]
    pub error_policy: Option<ErrorAction>,

    /// Post-write verification.
    #[builder(default)]
    pub verify: VerifyMode,

    /// Read/write chunk size in bytes.
    #[builder(default = "1024 * 1024")]
    pub chunk_size: usize,

    /// Minimum time between progress snapshots, in milliseconds.
    #[builder(default = "250")]
    pub progress_interval_ms: u64,

    /// Word used to build "keep both" names, e.g. "name (copy 1).txt".
    #[builder(default = "\"copy\".to_string()")]
    pub copy_marker: String,

    /// Upper bound on candidate names tried for "keep both".
    #[builder(default = "1000")]
    pub keep_both_attempts: u32,

    /// Extra directories that enforce the 4 GiB single-file ceiling.
    #[builder(default)]
    pub capped_targets: Vec<PathBuf>,
}

impl JobOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == Some(0) {
            return Err("Chunk size must be greater than zero".to_string());
        }
        if self.keep_both_attempts == Some(0) {
            return Err("Keep-both attempts must be greater than zero".to_string());
        }
        if let Some(ref marker) = self.copy_marker {
            check_marker(marker)?;
        }
        Ok(())
    }
}

/// The marker becomes part of a file name.
fn check_marker(marker: &str) -> Result<(), String> {
    if marker.trim().is_empty() {
        return Err("Copy marker cannot be empty".to_string());
    }
    if marker.contains('/') || marker.contains(std::path::MAIN_SEPARATOR) {
        return Err(format!("Copy marker cannot contain a path separator: {marker:?}"));
    }
    Ok(())
}

impl JobOptions {
    /// Create a new options builder.
    pub fn builder() -> JobOptionsBuilder {
        JobOptionsBuilder::default()
    }

    /// Minimum interval between progress snapshots.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Whether `path` lies under one of the configured capped targets.
    pub fn is_capped_target(&self, path: &Path) -> bool {
        self.capped_targets.iter().any(|capped| path.starts_with(capped))
    }

    /// Checks for options that bypassed the builder, such as ones read
    /// from a config file.
    pub fn validate(&self) -> Result<(), String> {
        if self.keep_both_attempts == 0 {
            return Err("Keep-both attempts must be greater than zero".to_string());
        }
        check_marker(&self.copy_marker)
    }

    /// Chunk size, never zero even for hand-built or deserialized options.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            preserve_permissions: true,
            preserve_timestamps: true,
            apply_to_all_conflicts: false,
            conflict_policy: None,
            error_policy: None,
            verify: VerifyMode::Size,
            chunk_size: 1024 * 1024,
            progress_interval_ms: 250,
            copy_marker: "copy".to_string(),
            keep_both_attempts: 1000,
            capped_targets: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_match_default() {
        let built = JobOptions::builder().build().unwrap();
        let default = JobOptions::default();

        assert_eq!(built.chunk_size, default.chunk_size);
        assert_eq!(built.copy_marker, default.copy_marker);
        assert_eq!(built.keep_both_attempts, default.keep_both_attempts);
        assert_eq!(built.verify, VerifyMode::Size);
        assert!(built.preserve_permissions);
        assert!(built.conflict_policy.is_none());
    }

    #[test]
    fn test_builder_rejects_zero_chunk() {
        let result = JobOptions::builder().chunk_size(0usize).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_blank_marker() {
        let result = JobOptions::builder().copy_marker("  ").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_marker_with_separator_rejected() {
        assert!(JobOptions::builder().copy_marker("a/b").build().is_err());
        let native = format!("a{}b", std::path::MAIN_SEPARATOR);
        assert!(JobOptions::builder().copy_marker(native).build().is_err());
        assert!(JobOptions::builder().copy_marker("kopie").build().is_ok());

        let options = JobOptions {
            copy_marker: "../x".to_string(),
            ..JobOptions::default()
        };
        assert!(options.validate().is_err());
        assert!(JobOptions::default().validate().is_ok());
    }

    #[test]
    fn test_capped_target() {
        let options = JobOptions::builder()
            .capped_targets(vec![PathBuf::from("/media/vault")])
            .build()
            .unwrap();

        assert!(options.is_capped_target(Path::new("/media/vault/docs/a.iso")));
        assert!(!options.is_capped_target(Path::new("/media/other/a.iso")));
    }

    #[test]
    fn test_strip_option_setters() {
        let options = JobOptions::builder()
            .conflict_policy(ConflictChoice::KeepBoth)
            .error_policy(ErrorAction::Skip)
            .build()
            .unwrap();

        assert_eq!(options.conflict_policy, Some(ConflictChoice::KeepBoth));
        assert_eq!(options.error_policy, Some(ErrorAction::Skip));
    }
}
