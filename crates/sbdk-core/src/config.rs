//! Project configuration (`sbdk_config.json`).
//!
//! Every field except `project` and `duckdb_path` has a default. Relative
//! paths resolve against the directory holding the config file; `~` expands
//! to `$HOME`. A few settings can be overridden from the environment:
//!
//! - `SBDK_WEBHOOK_SECRET`: shared secret for webhook signatures
//! - `SBDK_WEBHOOK_HOST` / `SBDK_WEBHOOK_PORT`: listener address

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Default config file name in a project root.
pub const CONFIG_FILE_NAME: &str = "sbdk_config.json";

pub const ENV_WEBHOOK_SECRET: &str = "SBDK_WEBHOOK_SECRET";
pub const ENV_WEBHOOK_HOST: &str = "SBDK_WEBHOOK_HOST";
pub const ENV_WEBHOOK_PORT: &str = "SBDK_WEBHOOK_PORT";

/// What a `TestOnly` trigger does to the Transform stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestOnlyPolicy {
    /// Transform in the engine's dry-run mode when it has one.
    #[default]
    DryRunTransform,

    /// Treat test-only triggers exactly like full rebuilds.
    FullRebuild,
}

/// Filesystem watch settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchSettings {
    /// Quiet period after the last change before a rebuild is triggered.
    pub debounce_ms: u64,

    /// Glob patterns never allowed to trigger a rebuild.
    pub ignore: Vec<String>,

    /// File extensions that count as relevant. Empty means every file.
    pub extensions: Vec<String>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            ignore: default_ignore_patterns(),
            extensions: ["py", "sql", "yml", "yaml"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Build outputs and scratch files that must not feed back into the watcher.
pub fn default_ignore_patterns() -> Vec<String> {
    [
        "**/*.duckdb",
        "**/*.duckdb.wal",
        "**/*.duckdb.tmp/**",
        "**/target/**",
        "**/logs/**",
        "**/dbt_packages/**",
        "**/__pycache__/**",
        "**/*.pyc",
        "**/.git/**",
        "**/.*.swp",
        "**/*~",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Producer and loader commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Python interpreter used for the default producer commands.
    pub python: String,

    /// Producer pipelines, run concurrently during Generate.
    pub producers: Vec<String>,

    /// Explicit commands per producer, overriding the default invocation.
    pub commands: BTreeMap<String, Vec<String>>,

    /// Command for the Load stage. When unset the producers are expected to
    /// have loaded the database themselves and Load only verifies it.
    pub load_command: Option<Vec<String>>,

    /// dbt executable.
    pub dbt_executable: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            producers: ["users", "events", "orders"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            commands: BTreeMap::new(),
            load_command: None,
            dbt_executable: "dbt".to_string(),
        }
    }
}

impl PipelineSettings {
    /// Command line for one producer.
    pub fn producer_command(&self, name: &str) -> Vec<String> {
        if let Some(cmd) = self.commands.get(name) {
            return cmd.clone();
        }
        vec![
            self.python.clone(),
            "-c".to_string(),
            format!("from pipelines.{} import run; run()", name),
        ]
    }
}

/// Per-stage collaborator timeouts, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageTimeouts {
    pub generate_secs: u64,
    pub load_secs: u64,
    pub transform_secs: u64,
    pub test_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            generate_secs: 600,
            load_secs: 300,
            transform_secs: 900,
            test_secs: 600,
        }
    }
}

impl StageTimeouts {
    pub fn generate(&self) -> Duration {
        Duration::from_secs(self.generate_secs)
    }

    pub fn load(&self) -> Duration {
        Duration::from_secs(self.load_secs)
    }

    pub fn transform(&self) -> Duration {
        Duration::from_secs(self.transform_secs)
    }

    pub fn test(&self) -> Duration {
        Duration::from_secs(self.test_secs)
    }
}

/// Webhook authentication and classification settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct WebhookSettings {
    /// Shared HMAC secret. Prefer `SBDK_WEBHOOK_SECRET` over storing it here.
    pub secret: Option<String>,

    /// Branch whose pushes trigger a rebuild. Defaults to `main`.
    pub branch: Option<String>,

    pub test_only_policy: TestOnlyPolicy,
}

impl WebhookSettings {
    pub fn branch(&self) -> &str {
        self.branch.as_deref().unwrap_or("main")
    }
}

/// Contents of `sbdk_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub project: String,

    #[serde(default = "default_target")]
    pub target: String,

    /// Embedded database file.
    pub duckdb_path: PathBuf,

    #[serde(default = "default_pipelines_path")]
    pub pipelines_path: PathBuf,

    #[serde(default = "default_dbt_path")]
    pub dbt_path: PathBuf,

    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,

    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,

    #[serde(default = "default_webhook_host")]
    pub webhook_host: String,

    /// Whether `sbdk dev` watches for changes by default.
    #[serde(default = "default_true")]
    pub auto_reload: bool,

    #[serde(default = "default_watch_paths")]
    pub watch_paths: Vec<PathBuf>,

    #[serde(default)]
    pub watch: WatchSettings,

    #[serde(default)]
    pub pipelines: PipelineSettings,

    #[serde(default)]
    pub timeouts: StageTimeouts,

    #[serde(default)]
    pub webhook: WebhookSettings,

    /// Directory containing the config file; relative paths resolve here.
    #[serde(skip)]
    pub root: PathBuf,
}

fn default_target() -> String {
    "dev".to_string()
}

fn default_pipelines_path() -> PathBuf {
    PathBuf::from("./pipelines")
}

fn default_dbt_path() -> PathBuf {
    PathBuf::from("./dbt")
}

fn default_profiles_dir() -> PathBuf {
    PathBuf::from("~/.dbt")
}

fn default_webhook_port() -> u16 {
    8000
}

fn default_webhook_host() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_watch_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("pipelines/"), PathBuf::from("dbt/models/")]
}

impl ProjectConfig {
    /// Load from a JSON file, resolve relative paths against its directory
    /// and apply environment overrides.
    ///
    /// The root is canonicalized, so every resolved path is absolute and
    /// matches what the OS watcher reports.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let root = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let root = std::fs::canonicalize(&root)?;

        let mut config = Self::from_json_str(&raw, root).map_err(|e| match e {
            ConfigError::Invalid { reason, .. } => ConfigError::Invalid {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config JSON rooted at `root`. No environment overrides.
    pub fn from_json_str(raw: &str, root: PathBuf) -> Result<Self> {
        let mut config: ProjectConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::Invalid {
                path: PathBuf::from(CONFIG_FILE_NAME),
                reason: e.to_string(),
            })?;
        config.root = root;
        Ok(config)
    }

    /// Apply `SBDK_WEBHOOK_*` overrides from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(ENV_WEBHOOK_SECRET).filter(|s| !s.is_empty()) {
            self.webhook.secret = Some(secret);
        }
        if let Some(host) = lookup(ENV_WEBHOOK_HOST).filter(|s| !s.is_empty()) {
            self.webhook_host = host;
        }
        if let Some(port) = lookup(ENV_WEBHOOK_PORT) {
            self.webhook_port = port.parse().map_err(|_| ConfigError::InvalidSetting {
                key: ENV_WEBHOOK_PORT.to_string(),
                reason: format!("'{}' is not a valid port", port),
            })?;
        }
        Ok(())
    }

    /// Reject settings that would make the orchestrator misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.watch.debounce_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "watch.debounce_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.pipelines.producers.is_empty() {
            return Err(ConfigError::InvalidSetting {
                key: "pipelines.producers".to_string(),
                reason: "at least one producer pipeline is required".to_string(),
            });
        }
        if let Some(cmd) = &self.pipelines.load_command {
            if cmd.is_empty() {
                return Err(ConfigError::InvalidSetting {
                    key: "pipelines.load_command".to_string(),
                    reason: "command must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolve a configured path: `~` expands to `$HOME`, relative paths
    /// join onto the project root. Inner `.` components are dropped.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if let Ok(rest) = path.strip_prefix("~") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest).components().collect();
            }
        }
        if path.is_absolute() {
            path.components().collect()
        } else {
            self.root.join(path).components().collect()
        }
    }

    pub fn duckdb_path(&self) -> PathBuf {
        self.resolve(&self.duckdb_path)
    }

    pub fn pipelines_path(&self) -> PathBuf {
        self.resolve(&self.pipelines_path)
    }

    pub fn dbt_path(&self) -> PathBuf {
        self.resolve(&self.dbt_path)
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.resolve(&self.profiles_dir)
    }

    pub fn watch_roots(&self) -> Vec<PathBuf> {
        self.watch_paths.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }

    /// Configured ignore patterns plus the database file itself, so a
    /// rebuild never re-triggers itself through its own output.
    pub fn watch_ignore_patterns(&self) -> Vec<String> {
        let mut patterns = self.watch.ignore.clone();
        let db = self.duckdb_path().to_string_lossy().into_owned();
        patterns.push(globset::escape(&db));
        patterns.push(globset::escape(&format!("{}.wal", db)));
        patterns
    }

    /// Which project paths exist on disk, keyed by role.
    pub fn validate_paths(&self) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        results.insert("pipelines".to_string(), self.pipelines_path().exists());
        results.insert("dbt".to_string(), self.dbt_path().exists());
        results.insert("profiles_dir".to_string(), self.profiles_dir().exists());
        let db = self.duckdb_path();
        results.insert(
            "duckdb_parent".to_string(),
            db.parent().map_or(false, Path::exists),
        );
        for root in self.watch_roots() {
            results.insert(format!("watch:{}", root.display()), root.exists());
        }
        results
    }
}
