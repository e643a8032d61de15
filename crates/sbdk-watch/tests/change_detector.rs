//! Integration tests for the change detector.

use sbdk_core::config::default_ignore_patterns;
use sbdk_core::{ProjectConfig, TriggerPayload, TriggerSource};
use sbdk_watch::{ChangeDetector, IgnoreFilter, WatchError, WatchSignal};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

fn sources_filter() -> IgnoreFilter {
    IgnoreFilter::new(default_ignore_patterns(), ["py", "sql", "yml", "yaml"]).unwrap()
}

fn paths_of(payload: &TriggerPayload) -> Vec<PathBuf> {
    match payload {
        TriggerPayload::FileChange { paths } => paths.clone(),
        other => panic!("expected FileChange payload, got {:?}", other),
    }
}

/// Test: three changes 50ms apart with a 200ms window yield one trigger
/// about 200ms after the third
#[tokio::test(start_paused = true)]
async fn test_burst_collapses_into_one_trigger() {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut stream = ChangeDetector::new(vec![], Duration::from_millis(200), sources_filter())
        .watch_signals(rx);

    let start = Instant::now();
    tx.send(WatchSignal::Changed(vec![PathBuf::from("/p/pipelines/users.py")]))
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    tx.send(WatchSignal::Changed(vec![PathBuf::from("/p/dbt/models/a.sql")]))
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    tx.send(WatchSignal::Changed(vec![PathBuf::from("/p/pipelines/users.py")]))
        .unwrap();

    let trigger = stream.next().await.expect("stream ended").expect("watch error");
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(320),
        "trigger fired after {:?}",
        elapsed
    );
    assert_eq!(trigger.source, TriggerSource::FileChange);
    assert_eq!(
        paths_of(&trigger.payload),
        vec![
            PathBuf::from("/p/dbt/models/a.sql"),
            PathBuf::from("/p/pipelines/users.py")
        ]
    );

    // Nothing else pending.
    assert!(timeout(Duration::from_secs(5), stream.next()).await.is_err());
}

/// Test: ignored paths neither open nor extend a window
#[tokio::test(start_paused = true)]
async fn test_ignored_changes_do_not_extend_window() {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut stream = ChangeDetector::new(vec![], Duration::from_millis(200), sources_filter())
        .watch_signals(rx);

    tx.send(WatchSignal::Changed(vec![PathBuf::from("/p/data/dev.duckdb")]))
        .unwrap();
    assert!(
        timeout(Duration::from_secs(1), stream.next()).await.is_err(),
        "database writes must not trigger a build"
    );

    let start = Instant::now();
    tx.send(WatchSignal::Changed(vec![PathBuf::from("/p/dbt/models/a.sql")]))
        .unwrap();
    sleep(Duration::from_millis(150)).await;
    tx.send(WatchSignal::Changed(vec![
        PathBuf::from("/p/data/dev.duckdb.wal"),
        PathBuf::from("/p/dbt/target/run/a.sql"),
    ]))
    .unwrap();

    let trigger = stream.next().await.unwrap().unwrap();
    assert!(start.elapsed() < Duration::from_millis(220));
    assert_eq!(paths_of(&trigger.payload), vec![PathBuf::from("/p/dbt/models/a.sql")]);
}

/// Test: a fatal watcher error ends the stream
#[tokio::test]
async fn test_fatal_signal_stops_stream() {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut stream =
        ChangeDetector::new(vec![], Duration::from_millis(50), sources_filter()).watch_signals(rx);

    tx.send(WatchSignal::Fatal(WatchError::Backend("inotify limit reached".into())))
        .unwrap();
    assert!(matches!(stream.next().await, Some(Err(WatchError::Backend(_)))));
    assert!(stream.next().await.is_none(), "stream is not restartable");
}

/// Test: missing root at start is a configuration error
#[tokio::test]
async fn test_missing_root_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let err = ChangeDetector::new(vec![missing.clone()], Duration::from_millis(50), sources_filter())
        .watch()
        .err()
        .expect("watch should fail");
    assert!(matches!(err, WatchError::RootMissing(p) if p == missing));

    let config_err: sbdk_core::ConfigError = WatchError::RootMissing(missing).into();
    assert!(config_err.to_string().contains("does-not-exist"));
}

/// Test: real filesystem change under a watched root produces a trigger
#[tokio::test]
async fn test_real_file_change_triggers() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");
    std::fs::create_dir_all(&models).unwrap();

    let mut stream = ChangeDetector::new(vec![models.clone()], Duration::from_millis(100), sources_filter())
        .watch()
        .expect("watch should start");

    // Give the OS watcher a moment to register.
    sleep(Duration::from_millis(100)).await;
    std::fs::write(models.join("dev.duckdb"), b"db").unwrap();
    std::fs::write(models.join("stg_users.sql"), "select 1").unwrap();

    let trigger = timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("no trigger within 10s")
        .expect("stream ended")
        .expect("watch error");
    let paths = paths_of(&trigger.payload);
    assert!(paths.iter().any(|p| p.ends_with("stg_users.sql")), "{:?}", paths);
    assert!(!paths.iter().any(|p| p.ends_with("dev.duckdb")), "{:?}", paths);
}

/// Test: removing a watched root is fatal
#[tokio::test]
async fn test_vanished_root_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("pipelines");
    std::fs::create_dir_all(&root).unwrap();

    let mut stream = ChangeDetector::new(vec![root.clone()], Duration::from_millis(50), sources_filter())
        .watch()
        .expect("watch should start");

    sleep(Duration::from_millis(100)).await;
    std::fs::remove_dir_all(&root).unwrap();

    let outcome = timeout(Duration::from_secs(10), async {
        while let Some(item) = stream.next().await {
            if let Err(e) = item {
                return Some(e);
            }
        }
        None
    })
    .await
    .expect("no error within 10s");
    assert!(matches!(outcome, Some(WatchError::RootVanished(_))));
}

/// Test: the configured database is ignored whatever its name, even with
/// no extension allow-list and no user ignore patterns
#[tokio::test(start_paused = true)]
async fn test_configured_database_never_triggers() {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    std::fs::create_dir_all(root.join("pipelines")).unwrap();
    std::fs::create_dir_all(root.join("data")).unwrap();

    let raw = r#"{
        "project": "demo",
        "duckdb_path": "./data/dev.db",
        "watch_paths": ["."],
        "watch": { "debounce_ms": 100, "ignore": [], "extensions": [] }
    }"#;
    let config = ProjectConfig::from_json_str(raw, root.clone()).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut stream = ChangeDetector::from_config(&config).unwrap().watch_signals(rx);

    tx.send(WatchSignal::Changed(vec![
        root.join("data/dev.db"),
        root.join("data/dev.db.wal"),
    ]))
    .unwrap();
    assert!(
        timeout(Duration::from_secs(1), stream.next()).await.is_err(),
        "database writes must not trigger a build"
    );

    tx.send(WatchSignal::Changed(vec![
        root.join("data/dev.db"),
        root.join("pipelines/users.py"),
    ]))
    .unwrap();
    let trigger = stream.next().await.unwrap().unwrap();
    assert_eq!(paths_of(&trigger.payload), vec![root.join("pipelines/users.py")]);
}

/// Test: a watcher overflow rebuilds with every root as the changed path
#[tokio::test(start_paused = true)]
async fn test_rescan_triggers_rebuild_of_all_roots() {
    let dir = tempfile::tempdir().unwrap();
    let pipelines = dir.path().join("pipelines");
    let models = dir.path().join("models");
    std::fs::create_dir_all(&pipelines).unwrap();
    std::fs::create_dir_all(&models).unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let mut stream = ChangeDetector::new(
        vec![pipelines.clone(), models.clone()],
        Duration::from_millis(100),
        sources_filter(),
    )
    .watch_signals(rx);

    tx.send(WatchSignal::Rescan).unwrap();
    tx.send(WatchSignal::Changed(vec![pipelines.join("users.py")]))
        .unwrap();

    let trigger = stream.next().await.unwrap().unwrap();
    assert_eq!(trigger.source, TriggerSource::FileChange);
    assert_eq!(
        paths_of(&trigger.payload),
        vec![models, pipelines.clone(), pipelines.join("users.py")]
    );
    assert!(timeout(Duration::from_secs(5), stream.next()).await.is_err());
}
