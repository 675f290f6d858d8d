use std::fs;
use std::sync::Arc;
use telescope_executive::cli::{ObservationReport, simulated_context};
use telescope_executive::config::ExecutiveSettings;
use telescope_executive::control::{FaultSpec, observe};
use telescope_executive::env::codes;
use telescope_executive::sequence::{NodeKind, load_sequence, validate_structure};
use telescope_executive::task::{RootManager, TaskMessage, TaskRef};
use tempfile::TempDir;

const NIGHT: &str = r#"
name = "m31-survey"
condition = { repeat_count = 2 }

[[children]]
kind = "slew"
target = { name = "M31", ra_deg = 10.684, dec_deg = 41.269 }

[[children]]
kind = "config"
instrument = "imager"
config_id = "r-band"

[[children]]
kind = "expose"
exposure_ms = 30000
count = 3

[[children]]
kind = "branch"
name = "arms"

[[children.components]]
name = "red"
children = [{ kind = "calibration", instrument = "red_arm", calibration = "arc" }]

[[children.components]]
name = "blue"
children = [{ kind = "calibration", instrument = "blue_arm", calibration = "arc" }]
"#;

const FAST: &str = r#"
[engine]
poll_interval_ms = 5

[retry]
max_attempts = 2
backoff_ms = 1

[simulation]
time_scale = 0.0
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("Should be able to write test file");
    path
}

#[tokio::test]
async fn test_night_document_runs_to_completion() {
    let dir = TempDir::new().unwrap();
    let sequence = write(&dir, "night.toml", NIGHT);
    let settings = ExecutiveSettings::from_toml_file(write(&dir, "tex.toml", FAST)).unwrap();

    let root = load_sequence(&sequence).expect("Should load the night sequence");
    validate_structure(&root).expect("Night sequence should be well formed");

    let (context, executives) = simulated_context(settings, &root, None, &[]);
    let manager = RootManager::new();
    let task: TaskRef = Arc::new(observe(root, context));
    let outcome = manager.run(task).await;

    assert!(outcome.is_done(), "{outcome:?}");
    // slew, config, expose and two calibrations per iteration
    assert_eq!(executives.total_created(), 10);
    assert_eq!(executives.created(NodeKind::Calibration), 4);

    let report = ObservationReport::new("m31-survey", &outcome, executives.total_created());
    assert!(report.succeeded());
    let tracker = report.tracker.expect("Done outcome should carry a tracker");
    assert_eq!(tracker.target.map(|t| t.name), Some("M31".to_string()));
    assert_eq!(tracker.instrument_configs.get("imager").map(String::as_str), Some("r-band"));

    let progress = manager
        .messages()
        .into_iter()
        .filter(|(_, message)| matches!(message, TaskMessage::Progress { .. }))
        .count();
    assert_eq!(progress, 2);
}

#[tokio::test]
async fn test_injected_fault_fails_observation_after_retries() {
    let dir = TempDir::new().unwrap();
    let root = load_sequence(&write(&dir, "night.toml", NIGHT)).unwrap();
    let settings = ExecutiveSettings::from_toml_str(FAST).unwrap();
    let fault: FaultSpec = "expose:5:4400".parse().unwrap();

    let (context, executives) = simulated_context(settings, &root, None, &[fault]);
    let task: TaskRef = Arc::new(observe(root, context));
    let outcome = RootManager::new().run(task).await;

    assert!(outcome.is_failed());
    assert_eq!(outcome.error().unwrap().code(), 4400);
    assert_eq!(executives.runs(NodeKind::Expose), 2);
    assert_eq!(executives.runs(NodeKind::Calibration), 0);
}

#[tokio::test]
async fn test_configured_offline_instrument_blocks_start() {
    let dir = TempDir::new().unwrap();
    let root = load_sequence(&write(&dir, "night.toml", NIGHT)).unwrap();
    let config = format!(
        "{FAST}\n[[instruments]]\nname = \"imager\"\nstatus = \"offline\"\n\n[[instruments]]\nname = \"red_arm\"\n\n[[instruments]]\nname = \"blue_arm\"\n"
    );
    let settings = ExecutiveSettings::from_toml_str(&config).unwrap();

    let (context, executives) = simulated_context(settings, &root, None, &[]);
    let task: TaskRef = Arc::new(observe(root, context));
    let outcome = RootManager::new().run(task).await;

    assert_eq!(outcome.error().unwrap().code(), codes::INSTRUMENT_OFFLINE);
    assert_eq!(executives.total_created(), 0);
}

#[test]
fn test_json_document_with_bad_branch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "bad.json",
        r#"{"name": "bad", "children": [{"kind": "branch", "name": "solo", "components": [{"name": "only"}]}]}"#,
    );

    let root = load_sequence(&path).unwrap();
    let err = validate_structure(&root).unwrap_err();
    assert!(err.to_string().contains("exactly 2"));
}
