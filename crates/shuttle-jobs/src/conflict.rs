//! Conflict resolution for destinations that already exist.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use shuttle_core::{ConflictChoice, ConflictInfo, DecisionProvider, JobOptions};

/// Turns conflicts into choices, remembering "apply to all" answers.
pub struct ConflictResolver {
    policy: Option<ConflictChoice>,
    apply_to_all: bool,
    sticky: Option<ConflictChoice>,
    marker: String,
    max_attempts: u32,
}

impl ConflictResolver {
    pub fn new(options: &JobOptions) -> Self {
        Self {
            policy: options.conflict_policy,
            apply_to_all: options.apply_to_all_conflicts,
            sticky: None,
            marker: options.copy_marker.clone(),
            max_attempts: options.keep_both_attempts,
        }
    }

    /// Choose what to do about one conflict.
    ///
    /// A preset policy or a sticky answer wins; otherwise the provider is
    /// asked. Merge between anything other than two directories becomes
    /// Replace.
    pub fn resolve(&mut self, provider: &dyn DecisionProvider, conflict: &ConflictInfo) -> ConflictChoice {
        let choice = if let Some(policy) = self.policy {
            policy
        } else if let Some(sticky) = self.sticky {
            tracing::debug!(path = %conflict.destination.display(), %sticky, "reusing conflict answer");
            sticky
        } else {
            let decision = provider.resolve_conflict(conflict);
            if decision.apply_to_all || self.apply_to_all {
                self.sticky = Some(decision.choice);
            }
            decision.choice
        };

        if choice == ConflictChoice::Merge && !conflict.can_merge() {
            return ConflictChoice::Replace;
        }
        choice
    }

    /// A free "keep both" name next to `path`.
    pub fn keep_both_path(&self, path: &Path, is_dir: bool) -> Option<PathBuf> {
        keep_both_path(path, &self.marker, self.max_attempts, is_dir)
    }
}

/// Find an unused sibling name: "name (copy).ext", then "name (copy 1).ext",
/// "name (copy 2).ext", and so on.
///
/// Directories keep their whole name as the stem. Gives up after
/// `max_attempts` candidates.
pub fn keep_both_path(path: &Path, marker: &str, max_attempts: u32, is_dir: bool) -> Option<PathBuf> {
    let parent = path.parent().unwrap_or(Path::new(""));
    let (stem, extension) = if is_dir {
        (path.file_name()?, None)
    } else {
        (path.file_stem()?, path.extension())
    };

    for i in 0..max_attempts {
        let mut name = OsString::from(stem);
        if i == 0 {
            name.push(format!(" ({marker})"));
        } else {
            name.push(format!(" ({marker} {i})"));
        }
        if let Some(ext) = extension {
            name.push(".");
            name.push(ext);
        }

        let candidate = parent.join(&name);
        // symlink_metadata so a dangling link still counts as taken
        if fs::symlink_metadata(&candidate).is_err() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuttle_core::{ConflictDecision, EntryType, ErrorAction, ErrorInfo};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Scripted {
        answers: Mutex<Vec<ConflictDecision>>,
        asked: Mutex<usize>,
    }

    impl Scripted {
        fn new(answers: Vec<ConflictDecision>) -> Self {
            Self {
                answers: Mutex::new(answers),
                asked: Mutex::new(0),
            }
        }

        fn asked(&self) -> usize {
            *self.asked.lock().unwrap()
        }
    }

    impl DecisionProvider for Scripted {
        fn resolve_conflict(&self, _conflict: &ConflictInfo) -> ConflictDecision {
            *self.asked.lock().unwrap() += 1;
            self.answers.lock().unwrap().remove(0)
        }

        fn recover(&self, _error: &ErrorInfo) -> ErrorAction {
            ErrorAction::Skip
        }
    }

    fn conflict(src: EntryType, dst: EntryType) -> ConflictInfo {
        ConflictInfo {
            source: PathBuf::from("/src/a"),
            destination: PathBuf::from("/dst/a"),
            source_entry: src,
            destination_entry: dst,
            source_size: 1,
            destination_size: 1,
            source_modified: None,
            destination_modified: None,
        }
    }

    #[test]
    fn test_keep_both_names() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("report.txt");
        fs::write(&path, "a").unwrap();

        let first = keep_both_path(&path, "copy", 1000, false).unwrap();
        assert_eq!(first, temp.path().join("report (copy).txt"));

        fs::write(&first, "b").unwrap();
        let second = keep_both_path(&path, "copy", 1000, false).unwrap();
        assert_eq!(second, temp.path().join("report (copy 1).txt"));
    }

    #[test]
    fn test_keep_both_directory_keeps_dots() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("photos.2020");
        fs::create_dir(&path).unwrap();

        let renamed = keep_both_path(&path, "copy", 1000, true).unwrap();
        assert_eq!(renamed, temp.path().join("photos.2020 (copy)"));
    }

    #[test]
    fn test_keep_both_exhaustion() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a");
        fs::write(&path, "").unwrap();
        fs::write(temp.path().join("a (copy)"), "").unwrap();
        fs::write(temp.path().join("a (copy 1)"), "").unwrap();

        assert!(keep_both_path(&path, "copy", 2, false).is_none());
        assert_eq!(
            keep_both_path(&path, "copy", 3, false).unwrap(),
            temp.path().join("a (copy 2)")
        );
    }

    #[test]
    fn test_apply_to_all_asks_once() {
        let provider = Scripted::new(vec![ConflictDecision::for_all(ConflictChoice::Replace)]);
        let mut resolver = ConflictResolver::new(&JobOptions::default());

        for _ in 0..5 {
            let choice = resolver.resolve(&provider, &conflict(EntryType::File, EntryType::File));
            assert_eq!(choice, ConflictChoice::Replace);
        }
        assert_eq!(provider.asked(), 1);
    }

    #[test]
    fn test_single_answers_ask_each_time() {
        let provider = Scripted::new(vec![
            ConflictDecision::once(ConflictChoice::Skip),
            ConflictDecision::once(ConflictChoice::KeepBoth),
        ]);
        let mut resolver = ConflictResolver::new(&JobOptions::default());
        let info = conflict(EntryType::File, EntryType::File);

        assert_eq!(resolver.resolve(&provider, &info), ConflictChoice::Skip);
        assert_eq!(resolver.resolve(&provider, &info), ConflictChoice::KeepBoth);
        assert_eq!(provider.asked(), 2);
    }

    #[test]
    fn test_option_makes_first_answer_sticky() {
        let provider = Scripted::new(vec![ConflictDecision::once(ConflictChoice::Skip)]);
        let options = JobOptions::builder()
            .apply_to_all_conflicts(true)
            .build()
            .unwrap();
        let mut resolver = ConflictResolver::new(&options);
        let info = conflict(EntryType::File, EntryType::File);

        resolver.resolve(&provider, &info);
        assert_eq!(resolver.resolve(&provider, &info), ConflictChoice::Skip);
        assert_eq!(provider.asked(), 1);
    }

    #[test]
    fn test_merge_on_files_replaces() {
        let provider = Scripted::new(vec![]);
        let options = JobOptions::builder()
            .conflict_policy(ConflictChoice::Merge)
            .build()
            .unwrap();
        let mut resolver = ConflictResolver::new(&options);

        assert_eq!(
            resolver.resolve(&provider, &conflict(EntryType::File, EntryType::File)),
            ConflictChoice::Replace
        );
        assert_eq!(
            resolver.resolve(&provider, &conflict(EntryType::Directory, EntryType::Directory)),
            ConflictChoice::Merge
        );
        assert_eq!(provider.asked(), 0);
    }
}
