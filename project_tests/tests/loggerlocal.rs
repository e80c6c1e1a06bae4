//! Global logging bootstrap. Kept in its own test binary because it installs
//! the process-wide subscriber.

use std::fs::File;

use lib_sentinel::{LoggerError, LoggerLocalOptions, init_logging};

#[test]
fn file_logging_rotates_and_writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    File::create(dir.path().join("itest-20000101_000000.log")).unwrap();
    File::create(dir.path().join("itest-20000102_000000.log")).unwrap();

    let options = LoggerLocalOptions {
        tty_level: "warn".into(),
        file_level: Some("info".into()),
        log_dir: Some(dir.path().to_path_buf()),
        json: true,
    };
    let guard = init_logging("itest", &options).unwrap();
    let log_file = guard.log_file().unwrap().to_path_buf();
    tracing::info!(zone = "north", "probe event");

    let console_only = LoggerLocalOptions {
        file_level: None,
        ..options.clone()
    };
    assert!(matches!(
        init_logging("itest", &console_only),
        Err(LoggerError::AlreadyInstalled(_))
    ));

    drop(guard);
    let contents = std::fs::read_to_string(&log_file).unwrap();
    assert!(contents.contains("probe event"));
    assert!(contents.lines().all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));

    // Only the newer stale file survived rotation, next to the new one.
    assert!(!dir.path().join("itest-20000101_000000.log").exists());
    assert!(dir.path().join("itest-20000102_000000.log").exists());
}
