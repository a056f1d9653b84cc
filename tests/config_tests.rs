use std::io::Write;

use tapeq::settings::{AppConfig, LogFormat, StorageKind};

#[tapeq::test]
fn defaults_apply_without_a_file() {
    let cfg = AppConfig::load(None).unwrap();
    assert_eq!(cfg.store.backend, StorageKind::Fs);
    assert_eq!(cfg.store.path, "/tmp/tapeq");
    assert_eq!(cfg.locking.lock_timeout_ms, 30_000);
    assert_eq!(cfg.retrieve.max_retries_within_mount, 3);
    assert_eq!(cfg.retrieve.max_total_retries, 6);
    assert_eq!(cfg.agent.heartbeat_timeout_ms, 60_000);
    assert_eq!(cfg.logging.format, LogFormat::Text);
}

#[tapeq::test]
fn partial_file_keeps_other_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[store]
backend = "memory"
path = "scratch"
flush_interval_ms = 5

[retrieve]
max_total_retries = 2

[agent]
name = "tapesrv01"

[logging]
format = "json"
"#
    )
    .unwrap();

    let cfg = AppConfig::load(Some(file.path())).unwrap();
    assert_eq!(cfg.store.backend, StorageKind::Memory);
    assert_eq!(cfg.store.path, "scratch");
    assert_eq!(cfg.store.flush_interval_ms, Some(5));
    assert_eq!(cfg.retrieve.max_total_retries, 2);
    assert_eq!(cfg.retrieve.max_retries_within_mount, 3);
    assert_eq!(cfg.agent.resolved_name(), "tapesrv01");
    assert_eq!(cfg.logging.format, LogFormat::Json);
    assert_eq!(cfg.locking.lock_timeout_ms, 30_000);
}

#[tapeq::test]
fn unknown_backend_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[store]\nbackend = \"tape\"\n").unwrap();
    assert!(AppConfig::load(Some(file.path())).is_err());
}

#[tapeq::test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(AppConfig::load(Some(dir.path().join("absent.toml").as_path())).is_err());
}
