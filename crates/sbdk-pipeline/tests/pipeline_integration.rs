//! Integration tests for the stage runner against real subprocesses.

use sbdk_core::{
    BuildCoordinator, BuildScope, OverallStatus, ProjectConfig, Stage, StageStatus,
    TriggerRequest,
};
use sbdk_pipeline::StageRunner;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

const FAKE_DBT: &str = r#"#!/bin/sh
echo "$1" >> invocations.log
case "$1" in
  deps)
    if [ -f fail_deps ]; then
      echo "Package dbt-labs/dbt_utils was not found" >&2
      exit 2
    fi
    exit 0
    ;;
  run|compile)
    if [ -f fail_run ]; then
      echo "Compilation Error in model users" >&2
      exit 1
    fi
    echo '{"info": {"name": "MainReportVersion", "msg": "Running with dbt=1.7.0"}, "data": {}}'
    exit 0
    ;;
  test)
    echo '{"info": {"name": "LogTestResult", "msg": "PASS not_null_users_id"}, "data": {"name": "not_null_users_id", "status": "pass"}}'
    if [ -f fail_tests ]; then
      echo '{"info": {"name": "LogTestResult", "msg": "FAIL 2 unique_users_email"}, "data": {"name": "unique_users_email", "status": "fail"}}'
      exit 1
    fi
    exit 0
    ;;
esac
exit 2
"#;

/// Project layout with shell producers and a scripted dbt.
fn project(root: &Path) -> ProjectConfig {
    let dbt_dir = root.join("dbt");
    std::fs::create_dir_all(&dbt_dir).unwrap();
    std::fs::create_dir_all(root.join("pipelines")).unwrap();

    let dbt = root.join("fake-dbt");
    std::fs::write(&dbt, FAKE_DBT).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dbt, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let raw = json!({
        "project": "demo",
        "duckdb_path": "data/dev.duckdb",
        "profiles_dir": "dbt",
        "pipelines": {
            "producers": ["users", "events"],
            "commands": {
                "users": ["sh", "-c", "mkdir -p data && touch data/dev.duckdb && echo '{\"record_count\": 10}'"],
                "events": ["sh", "-c", "echo '{\"record_count\": 32}'"]
            },
            "dbt_executable": dbt.display().to_string()
        }
    });
    ProjectConfig::from_json_str(&raw.to_string(), root.to_path_buf()).expect("config parses")
}

fn invocations(root: &Path) -> Vec<String> {
    std::fs::read_to_string(root.join("dbt").join("invocations.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Test: full build with every stage passing
#[tokio::test]
async fn test_successful_build() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(dir.path());

    let result = StageRunner::from_config(&config)
        .run(TriggerRequest::manual())
        .await;

    assert_eq!(result.overall_status, OverallStatus::Success, "{:#?}", result);
    assert_eq!(result.outcomes.len(), 4, "All four stages should run");
    assert!(result.is_well_formed());

    let generate = result.outcome(Stage::Generate).unwrap();
    assert_eq!(generate.details.message, "2 producers, 42 records");
    assert_eq!(invocations(dir.path()), vec!["run", "test"]);
}

/// Test: failing data-quality check degrades the build (Scenario D)
#[tokio::test]
async fn test_failing_check_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(dir.path());
    std::fs::write(dir.path().join("dbt").join("fail_tests"), "").unwrap();

    let result = StageRunner::from_config(&config)
        .run(TriggerRequest::manual())
        .await;

    assert_eq!(result.overall_status, OverallStatus::Degraded);
    let test = result.outcome(Stage::Test).unwrap();
    assert_eq!(test.status, StageStatus::SoftFailure);
    assert_eq!(test.details.failed_checks(), vec!["unique_users_email"]);
    assert_eq!(sbdk_core::exit_code(&result), 0);
}

/// Test: transform failure stops the build before Test (Scenario C)
#[tokio::test]
async fn test_transform_failure_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(dir.path());
    std::fs::write(dir.path().join("dbt").join("fail_run"), "").unwrap();

    let result = StageRunner::from_config(&config)
        .run(TriggerRequest::manual())
        .await;

    assert_eq!(
        result.statuses(),
        vec![
            (Stage::Generate, StageStatus::Success),
            (Stage::Load, StageStatus::Success),
            (Stage::Transform, StageStatus::HardFailure),
        ]
    );
    assert_eq!(result.overall_status, OverallStatus::Failed);
    assert_eq!(sbdk_core::exit_code(&result), 1);
    let excerpt = result.outcomes[2].details.log_excerpt.clone().unwrap();
    assert!(excerpt.contains("Compilation Error"));
    assert_eq!(invocations(dir.path()), vec!["run"]);
}

/// Test: missing database after Generate fails Load
#[tokio::test]
async fn test_missing_database_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = project(dir.path());
    config.pipelines.commands.insert(
        "users".to_string(),
        vec!["sh".to_string(), "-c".to_string(), "true".to_string()],
    );

    let result = StageRunner::from_config(&config)
        .run(TriggerRequest::manual())
        .await;

    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(result.outcomes[1].status, StageStatus::HardFailure);
    assert!(result.outcomes[1].details.message.contains("database not found"));
}

/// Test: test-only trigger compiles instead of running models
#[tokio::test]
async fn test_pull_request_uses_compile() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(dir.path());

    let trigger = TriggerRequest::webhook(
        "pull_request",
        Some("delivery-1".to_string()),
        Some("#7".to_string()),
        BuildScope::TestOnly,
    );
    let result = StageRunner::from_config(&config).run(trigger).await;

    assert_eq!(result.overall_status, OverallStatus::Success);
    assert_eq!(invocations(dir.path()), vec!["compile", "test"]);
}

/// Test: the runner drives builds through the coordinator
#[tokio::test]
async fn test_runner_as_coordinator_executor() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(dir.path());
    let coordinator = BuildCoordinator::new(Arc::new(StageRunner::from_config(&config)));

    let result = coordinator
        .run_to_completion(TriggerRequest::manual())
        .await
        .expect("build should finish");

    assert_eq!(result.overall_status, OverallStatus::Success);
    assert_eq!(coordinator.builds_started(), 1);
}

/// Test: declared packages are installed before models are built
#[tokio::test]
async fn test_packages_installed_before_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = project(dir.path());
    std::fs::write(
        dir.path().join("dbt").join("packages.yml"),
        "packages:\n  - package: dbt-labs/dbt_utils\n",
    )
    .unwrap();

    let result = StageRunner::from_config(&config)
        .run(TriggerRequest::manual())
        .await;
    assert_eq!(result.overall_status, OverallStatus::Success, "{:#?}", result);
    assert_eq!(invocations(dir.path()), vec!["deps", "run", "test"]);

    std::fs::write(dir.path().join("dbt").join("fail_deps"), "").unwrap();
    let result = StageRunner::from_config(&config)
        .run(TriggerRequest::manual())
        .await;
    let transform = result.outcome(Stage::Transform).unwrap();
    assert_eq!(transform.status, StageStatus::HardFailure);
    assert!(transform.details.message.contains("dbt deps"));
    assert!(result.outcome(Stage::Test).is_none());
}
