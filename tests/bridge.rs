//! Bridge tests against the `mock-engine` binary.
//!
//! Each test gets its own scratch root so it can assert that no transient
//! artifacts survive the call.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use track_a_face::{CalculationBridge, EngineConfig, EngineFault, ErrorKind, RestaurantInput};

const MOCK_ENGINE: &str = env!("CARGO_BIN_EXE_mock-engine");

struct Harness {
    scratch: TempDir,
    files: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            scratch: tempfile::tempdir().expect("scratch dir"),
            files: tempfile::tempdir().expect("files dir"),
        }
    }

    fn config(&self, args: &[&str]) -> EngineConfig {
        EngineConfig {
            engine_args: args.iter().map(|a| a.to_string()).collect(),
            scratch_dir: Some(self.scratch.path().to_path_buf()),
            retry_backoff_ms: 0,
            ..EngineConfig::direct(MOCK_ENGINE)
        }
    }

    fn bridge(&self, args: &[&str]) -> CalculationBridge {
        CalculationBridge::new(self.config(args))
    }

    fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.files.path().join(name);
        std::fs::write(&path, contents).expect("write fixture");
        path
    }

    fn state_path(&self) -> PathBuf {
        self.files.path().join("attempts")
    }

    fn attempts(&self) -> u32 {
        std::fs::read_to_string(self.state_path())
            .map(|s| s.trim().parse().unwrap())
            .unwrap_or(0)
    }

    fn assert_no_artifacts(&self) {
        let leftovers: Vec<_> = std::fs::read_dir(self.scratch.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert!(leftovers.is_empty(), "leftover artifacts: {leftovers:?}");
    }
}

fn input() -> RestaurantInput {
    RestaurantInput {
        session_name: "Bistro Central".to_string(),
        staff_count: 15,
        kitchen_size_sqm: 100.0,
        daily_capacity: 200,
        rent_monthly: 4000.0,
        equipment_value: 150_000.0,
        ..RestaurantInput::default()
    }
}

fn as_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}

#[tokio::test]
async fn computed_result_round_trips() {
    let h = Harness::new();
    let bridge = h.bridge(&[]);

    let result = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .expect("calculation succeeds");

    assert_eq!(result.session_name, "Bistro Central");
    assert!(result.validation_passed);
    assert!(result.is_consistent());
    assert_eq!(result.location_costs, 4000.0);
    assert_eq!(result.cost_breakdowns.len(), 4);
    h.assert_no_artifacts();
}

#[tokio::test]
async fn total_cost_is_bit_exact() {
    let h = Harness::new();
    let response = r#"{
        "session_id": 7,
        "session_name": "Bistro Central",
        "calculation_timestamp": "2024-05-01 12:00:00",
        "validation_passed": true,
        "staff_costs": 98765.4321,
        "equipment_costs": 0.1,
        "location_costs": 0.2,
        "operational_costs": 12345.678901234567,
        "total_cost": 111111.41102123456,
        "cost_breakdowns": [
            {"category": "Staff", "subcategory": "Wages", "amount": 98765.4321,
             "formula": "n x rate", "details": {"rate": 3200}}
        ]
    }"#;
    let canned = h.file("response.json", response);
    let bridge = h.bridge(&["--response", as_str(&canned)]);

    let result = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .expect("calculation succeeds");

    let expected: serde_json::Value = serde_json::from_str(response).unwrap();
    assert_eq!(result.total_cost, expected["total_cost"].as_f64().unwrap());
    assert_eq!(result.total_cost, 111111.41102123456);
    assert_eq!(result.operational_costs, 12345.678901234567);
    assert_eq!(result.session_id, "7");
    h.assert_no_artifacts();
}

#[tokio::test]
async fn stdout_is_used_when_no_output_artifact() {
    let h = Harness::new();
    let bridge = h.bridge(&["--stdout"]);
    let result = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .expect("calculation succeeds");
    assert_eq!(result.session_name, "Bistro Central");
}

#[tokio::test]
async fn hung_engine_times_out_and_leaves_nothing_behind() {
    let h = Harness::new();
    let bridge = h.bridge(&["--mode", "hang"]);

    let started = Instant::now();
    let err = bridge
        .calculate(input(), Duration::from_millis(500), 1)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(30));
    h.assert_no_artifacts();
}

#[tokio::test]
async fn non_zero_exit_is_engine_failure_with_stderr() {
    let h = Harness::new();
    let bridge = h.bridge(&["--mode", "fail", "--stderr", "boom"]);

    let err = bridge
        .calculate(input(), Duration::from_secs(10), 3)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::EngineFailure);
    assert!(err.details.contains("boom"));
    assert!(err.message.contains("code 1"));
    h.assert_no_artifacts();
}

#[tokio::test]
async fn engine_failure_is_not_retried() {
    let h = Harness::new();
    let state = h.state_path();
    let bridge = h.bridge(&["--mode", "fail", "--state", as_str(&state)]);

    let err = bridge
        .calculate(input(), Duration::from_secs(10), 3)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::EngineFailure);
    assert_eq!(h.attempts(), 1);
}

#[tokio::test]
async fn error_document_with_failing_exit_surfaces_engine_message() {
    let h = Harness::new();
    let bridge = h.bridge(&["--mode", "error-shape"]);

    let err = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::EngineFailure);
    assert!(err.message.contains("validation_error"));
    assert!(err.details.contains("staff_count is out of range"));
}

#[tokio::test]
async fn error_document_with_clean_exit_is_engine_failure() {
    let h = Harness::new();
    let bridge = h.bridge(&["--mode", "error-shape", "--exit-code", "0"]);

    let err = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::EngineFailure);
    assert!(err.message.contains("staff_count is out of range"));
    assert_eq!(err.details, "Input data is not valid");
}

#[tokio::test]
async fn empty_output_is_classified() {
    let h = Harness::new();
    let bridge = h.bridge(&["--mode", "empty"]);
    let err = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::EmptyOutput);
    h.assert_no_artifacts();
}

#[tokio::test]
async fn garbage_output_is_malformed() {
    let h = Harness::new();
    let bridge = h.bridge(&["--mode", "garbage"]);
    let err = bridge
        .calculate(input(), Duration::from_secs(10), 3)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MalformedResponse);
    assert!(!err.details.is_empty());
}

#[tokio::test]
async fn response_missing_fields_is_malformed_with_paths() {
    let h = Harness::new();
    let canned = h.file(
        "partial.json",
        r#"{"session_id": "1", "session_name": "x", "validation_passed": true, "staff_costs": "many"}"#,
    );
    let bridge = h.bridge(&["--response", as_str(&canned)]);
    let err = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MalformedResponse);
    assert!(err.details.contains("$.staff_costs"));
    assert!(err.details.contains("$.total_cost"));
}

#[tokio::test]
async fn negative_amount_is_malformed() {
    let h = Harness::new();
    let canned = h.file(
        "negative.json",
        r#"{"session_id": "1", "session_name": "x", "validation_passed": true,
            "staff_costs": -1.0, "equipment_costs": 1.0, "location_costs": 1.0,
            "operational_costs": 1.0, "total_cost": 2.0, "cost_breakdowns": []}"#,
    );
    let bridge = h.bridge(&["--response", as_str(&canned)]);
    let err = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MalformedResponse);
    assert!(err.details.contains("staff_costs"));
}

#[tokio::test]
async fn inconsistent_totals_are_still_returned() {
    let h = Harness::new();
    let canned = h.file(
        "inconsistent.json",
        r#"{"session_id": "1", "session_name": "x", "validation_passed": false,
            "staff_costs": 1.0, "equipment_costs": 1.0, "location_costs": 1.0,
            "operational_costs": 1.0, "total_cost": 500.0}"#,
    );
    let bridge = h.bridge(&["--response", as_str(&canned)]);
    let result = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .expect("advisory check does not fail the call");
    assert!(!result.is_consistent());
    assert!(result.cost_breakdowns.is_empty());
}

#[tokio::test]
async fn timeouts_are_retried_until_success() {
    let h = Harness::new();
    let state = h.state_path();
    let bridge = h.bridge(&[
        "--mode",
        "hang",
        "--fail-attempts",
        "2",
        "--state",
        as_str(&state),
    ]);

    let result = bridge
        .calculate(input(), Duration::from_millis(750), 3)
        .await
        .expect("third attempt succeeds");

    assert_eq!(result.session_name, "Bistro Central");
    assert_eq!(h.attempts(), 3);
    h.assert_no_artifacts();
}

#[tokio::test]
async fn single_attempt_budget_returns_the_timeout() {
    let h = Harness::new();
    let state = h.state_path();
    let bridge = h.bridge(&[
        "--mode",
        "hang",
        "--fail-attempts",
        "2",
        "--state",
        as_str(&state),
    ]);

    let err = bridge
        .calculate(input(), Duration::from_millis(500), 1)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(h.attempts(), 1);
    h.assert_no_artifacts();
}

#[tokio::test]
async fn submit_rejects_invalid_input_without_spawning() {
    let h = Harness::new();
    let state = h.state_path();
    let bridge = h.bridge(&["--state", as_str(&state)]);

    let bad = RestaurantInput {
        staff_count: 0,
        ..input()
    };
    let err = bridge.submit(&bad).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.details.contains("staff_count"));
    assert_eq!(h.attempts(), 0);
}

#[tokio::test]
async fn submit_runs_valid_input() {
    let h = Harness::new();
    let result = h.bridge(&[]).submit(&input()).await.expect("valid input");
    assert_eq!(result.session_name, "Bistro Central");
}

#[tokio::test]
async fn bridge_reports_busy_while_calculating() {
    let h = Harness::new();
    let bridge = Arc::new(h.bridge(&["--sleep-ms", "600"]));

    let running = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.calculate(input(), Duration::from_secs(10), 1).await })
    };

    let mut saw_busy = false;
    for _ in 0..50 {
        if bridge.is_busy() {
            saw_busy = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let result = running.await.expect("task joined");
    assert!(saw_busy);
    assert!(result.is_ok());
    assert!(!bridge.is_busy());
}

#[tokio::test]
async fn diagnose_reports_direct_engine() {
    let h = Harness::new();
    let diagnostic = h.bridge(&[]).diagnose().await;
    assert!(diagnostic.engine_found);
    assert!(diagnostic.is_ready());
    assert_eq!(diagnostic.max_retries, 3);
}

#[cfg(unix)]
#[tokio::test]
async fn timeout_covers_descendants_holding_the_pipes() {
    let h = Harness::new();
    // exits at once, but the backgrounded sleep keeps stdout and stderr open
    let script = h.file("lingering.sh", "sleep 8 &\nexit 0\n");
    let config = EngineConfig {
        interpreter: Some("/bin/sh".into()),
        engine_path: script,
        scratch_dir: Some(h.scratch.path().to_path_buf()),
        required_files: Vec::new(),
        ..EngineConfig::default()
    };
    let bridge = CalculationBridge::new(config);

    let started = Instant::now();
    let err = bridge
        .calculate(input(), Duration::from_millis(500), 1)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "took {:?}",
        started.elapsed()
    );
    h.assert_no_artifacts();
    assert!(!bridge.is_busy());
}

#[tokio::test]
async fn crash_cause_is_recognized_from_stderr() {
    let h = Harness::new();
    let bridge = h.bridge(&[
        "--mode",
        "fail",
        "--stderr",
        "Traceback (most recent call last):\nModuleNotFoundError: No module named 'pandas'",
    ]);

    let err = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::EngineFailure);
    assert_eq!(err.fault, Some(EngineFault::MissingDependency));
    assert!(err.user_summary().contains("not installed"));
}

#[tokio::test]
async fn unrecognized_crash_has_no_fault() {
    let h = Harness::new();
    let bridge = h.bridge(&["--mode", "fail", "--stderr", "boom"]);
    let err = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .unwrap_err();
    assert_eq!(err.fault, None);
}

#[tokio::test]
async fn oversized_output_is_cut_at_the_cap() {
    let h = Harness::new();
    let config = EngineConfig {
        max_output_bytes: 64,
        ..h.config(&["--stdout"])
    };
    let bridge = CalculationBridge::new(config);

    let err = bridge
        .calculate(input(), Duration::from_secs(10), 1)
        .await
        .unwrap_err();

    // the full document is well over 64 bytes, so the kept prefix is not JSON
    assert_eq!(err.kind, ErrorKind::MalformedResponse);
    h.assert_no_artifacts();
}

#[tokio::test]
async fn connection_test_runs_a_canned_calculation() {
    let h = Harness::new();
    let state = h.state_path();
    let result = h
        .bridge(&["--state", as_str(&state)])
        .test_connection()
        .await
        .expect("mock engine answers");

    assert_eq!(result.session_name, "Test Connection");
    assert_eq!(result.location_costs, 4000.0);
    assert_eq!(h.attempts(), 1);
}

#[tokio::test]
async fn connection_test_is_a_single_attempt() {
    let h = Harness::new();
    let state = h.state_path();
    let config = EngineConfig {
        timeout_secs: 0.5,
        ..h.config(&["--mode", "hang", "--state", as_str(&state)])
    };

    let err = CalculationBridge::new(config)
        .test_connection()
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(h.attempts(), 1);
}

#[tokio::test]
async fn diagnose_lists_missing_engine_files() {
    let h = Harness::new();
    h.file("engine.py", "");
    let config = EngineConfig {
        working_dir: Some(h.files.path().to_path_buf()),
        required_files: vec!["engine.py".into(), "sql.py".into()],
        ..h.config(&[])
    };

    let diagnostic = CalculationBridge::new(config).diagnose().await;

    assert!(diagnostic.engine_found);
    assert_eq!(diagnostic.missing_files, vec![h.files.path().join("sql.py")]);
    assert!(!diagnostic.is_ready());
    assert!(diagnostic.to_string().contains("sql.py"));
}
