use shuttle_core::{
    ConflictChoice, EngineError, EntryType, ErrorAction, ErrorKind, ItemStatus, JobError,
    JobOptions, JobOutcome, JobReport, JobSpec, JobState, OperationKind, VerifyMode, WorkItem,
};
use std::path::PathBuf;

#[test]
fn test_options_from_partial_toml() {
    let options: JobOptions = toml::from_str(
        r#"
        verify = "checksum"
        conflict_policy = "keep_both"
        chunk_size = 4096
        capped_targets = ["/media/usb"]
        "#,
    )
    .unwrap();

    assert_eq!(options.verify, VerifyMode::Checksum);
    assert_eq!(options.conflict_policy, Some(ConflictChoice::KeepBoth));
    assert_eq!(options.chunk_size, 4096);
    assert!(options.is_capped_target(&PathBuf::from("/media/usb/photos/a.jpg")));

    // Everything else keeps its default.
    let defaults = JobOptions::default();
    assert_eq!(options.copy_marker, defaults.copy_marker);
    assert_eq!(options.progress_interval_ms, defaults.progress_interval_ms);
    assert!(options.preserve_timestamps);
    assert_eq!(options.error_policy, None);
}

#[test]
fn test_builder_validation() {
    assert!(JobOptions::builder().chunk_size(0usize).build().is_err());
    assert!(JobOptions::builder().copy_marker("  ").build().is_err());
    assert!(JobOptions::builder().keep_both_attempts(0u32).build().is_err());

    let options = JobOptions::builder()
        .error_policy(ErrorAction::Retry)
        .build()
        .unwrap();
    assert_eq!(options.error_policy, Some(ErrorAction::Retry));
    assert_eq!(options.chunk_size, 1024 * 1024);
}

#[test]
fn test_zero_chunk_from_config_still_usable() {
    let options: JobOptions = toml::from_str("chunk_size = 0").unwrap();
    assert_eq!(options.effective_chunk_size(), 1);
}

#[test]
fn test_marker_from_config_is_checked() {
    let options: JobOptions = toml::from_str(r#"copy_marker = "sub/dir""#).unwrap();
    assert!(options.validate().is_err());

    let spec = JobSpec::copy(vec!["/a".into()], "/b").with_options(options);
    assert!(matches!(spec.validate(), Err(EngineError::InvalidJob { .. })));
}

#[test]
fn test_spec_validation() {
    assert!(JobSpec::copy(vec!["/a".into()], "/b").validate().is_ok());
    assert!(JobSpec::delete(vec!["/a".into()]).validate().is_ok());

    let empty = JobSpec::trash(vec![]).validate();
    assert!(matches!(empty, Err(EngineError::InvalidJob { .. })));

    let mut delete_with_target = JobSpec::delete(vec!["/a".into()]);
    delete_with_target.target = Some("/b".into());
    assert!(delete_with_target.validate().is_err());

    let mut copy_without_target = JobSpec::copy(vec!["/a".into()], "/b");
    copy_without_target.target = None;
    assert!(copy_without_target.validate().is_err());
}

#[test]
fn test_spec_json_shape() {
    let spec = JobSpec::move_to(vec!["/src/a".into()], "/dst");
    let json = serde_json::to_value(&spec).unwrap();

    assert_eq!(json["kind"], "move");
    assert_eq!(json["target"], "/dst");

    let parsed: JobSpec =
        serde_json::from_str(r#"{"kind":"restore","sources":["/t/a"],"target":"/home"}"#).unwrap();
    assert_eq!(parsed.kind, OperationKind::Restore);
    assert!(parsed.kind.removes_source());
    assert_eq!(parsed.options.chunk_size, JobOptions::default().chunk_size);
}

#[test]
fn test_state_machine() {
    assert!(JobState::Idle.can_advance_to(JobState::Enumerating));
    assert!(JobState::Enumerating.can_advance_to(JobState::Failed));
    assert!(JobState::Transferring.can_advance_to(JobState::Cancelled));
    assert!(!JobState::Enumerating.can_advance_to(JobState::Completed));
    assert!(!JobState::Completed.can_advance_to(JobState::Transferring));
    assert!(JobState::Failed.is_terminal());
}

#[test]
fn test_report_counts_and_summary() {
    let mut done = WorkItem::new("/s/a", "/d/a", EntryType::File, 10, 0);
    done.complete().unwrap();
    let mut skipped = WorkItem::new("/s/b", "/d/b", EntryType::File, 5, 0);
    skipped.skip().unwrap();
    let pending = WorkItem::new("/s/c", "/d/c", EntryType::File, 1, 0);

    let report = JobReport::new(
        OperationKind::Copy,
        JobOutcome::Cancelled,
        vec![done, skipped, pending],
        10,
        vec![JobError::new(ErrorKind::WriteFailed, "/d/b", "disk unplugged")],
    );

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.item(&PathBuf::from("/s/c")).unwrap().status, ItemStatus::Pending);
    assert_eq!(report.summary(), "Copied 1 items, 1 skipped (cancelled)");
}

#[test]
fn test_retry_cycle() {
    let mut item = WorkItem::new("/s/a", "/d/a", EntryType::File, 10, 0);
    item.fail(JobError::new(ErrorKind::ReadFailed, "/s/a", "EIO")).unwrap();
    assert_eq!(item.status, ItemStatus::Failed);

    item.retry().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert!(item.error.is_none());

    item.complete().unwrap();
    assert!(item.retry().is_err());
}
