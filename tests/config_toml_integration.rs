use std::fs;
use std::time::Duration;
use telescope_executive::config::{ConfigDiscovery, ConfigError, ExecutiveSettings};
use telescope_executive::env::identity;
use telescope_executive::task::{ExhaustedAction, UnblockRule};
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_config_serialization_roundtrip() {
    let original = ExecutiveSettings::default();

    let toml_str = original
        .to_toml_string()
        .expect("Should be able to serialize settings to TOML");
    assert!(toml_str.contains("poll_interval_ms"), "Should contain engine section");
    assert!(toml_str.contains("max_attempts"), "Should contain retry section");

    let parsed = ExecutiveSettings::from_toml_str(&toml_str)
        .expect("Should be able to deserialize TOML string");
    assert_eq!(parsed, original);
}

#[test]
fn test_config_file_operations() {
    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");
    let mut settings = ExecutiveSettings::default();
    settings.engine.unblock_rule = UnblockRule::AllowFailed;
    settings.retry.on_exhausted = ExhaustedAction::Skip;

    settings
        .to_toml_file(temp_file.path())
        .expect("Should be able to save settings to file");
    let loaded = ExecutiveSettings::from_toml_file(temp_file.path())
        .expect("Should be able to load settings from file");

    assert_eq!(loaded, settings);
    assert_eq!(
        loaded.engine_for(identity::GROUP).unblock_rule,
        UnblockRule::AllowFailed
    );
}

#[test]
fn test_partial_file_keeps_defaults() {
    let temp_file = NamedTempFile::new().unwrap();
    fs::write(
        temp_file.path(),
        "[retry]\nbackoff_ms = 250\n\n[tasks.branch_control]\npoll_interval_ms = 20\n",
    )
    .unwrap();

    let settings = ExecutiveSettings::from_toml_file(temp_file.path()).unwrap();
    let retry = settings.retry_for(identity::BRANCH_CONTROL);
    assert_eq!(retry.backoff, Duration::from_millis(250));
    assert_eq!(retry.max_attempts, 3);
    assert_eq!(
        settings.engine_for(identity::BRANCH_CONTROL).poll_interval,
        Duration::from_millis(20)
    );
    assert_eq!(
        settings.engine_for(identity::ITERATOR_SEQUENCE).poll_interval,
        Duration::from_secs(3)
    );
}

#[test]
fn test_missing_file_reports_path() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let err = ConfigDiscovery::load(Some(&missing)).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn test_invalid_override_rejected() {
    let err = ExecutiveSettings::from_toml_str("[tasks.group]\nmax_attempts = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
