//! Run settings loaded from YAML or the process environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::poll::{PollConfig, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};
use crate::resolve::ChildBudget;
use crate::{Error, Result, DEFAULT_FIELD_MANAGER, DEFAULT_NAMESPACE};

/// Namespace the run operates in
pub const ENV_NAMESPACE: &str = "CONVERGE_NAMESPACE";
/// Kubeconfig path; inferred when unset
pub const ENV_KUBECONFIG: &str = "CONVERGE_KUBECONFIG";
/// Poll interval in milliseconds
pub const ENV_POLL_INTERVAL_MS: &str = "CONVERGE_POLL_INTERVAL_MS";
/// Default per-condition budget in seconds
pub const ENV_POLL_TIMEOUT_SECS: &str = "CONVERGE_POLL_TIMEOUT_SECS";
/// Whole-run deadline in seconds
pub const ENV_RUN_TIMEOUT_SECS: &str = "CONVERGE_RUN_TIMEOUT_SECS";
/// `per-child` or `shared`
pub const ENV_CHILD_BUDGET: &str = "CONVERGE_CHILD_BUDGET";

/// Settings for one environment
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Namespace the run operates in
    pub namespace: String,
    /// Explicit kubeconfig; the ambient config is inferred when absent
    pub kubeconfig: Option<PathBuf>,
    /// Time between predicate invocations
    pub poll_interval_ms: u64,
    /// Default budget for a single condition
    pub poll_timeout_secs: u64,
    /// Deadline for a whole feature run
    pub run_timeout_secs: Option<u64>,
    /// How sibling children share a timeout
    pub child_budget: ChildBudget,
    /// Field manager used for server-side apply
    pub field_manager: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            kubeconfig: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT.as_secs(),
            run_timeout_secs: None,
            child_budget: ChildBudget::default(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

impl Settings {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    /// Defaults overridden by `CONVERGE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            settings.namespace = namespace;
        }
        if let Some(path) = lookup(ENV_KUBECONFIG).filter(|p| !p.is_empty()) {
            settings.kubeconfig = Some(PathBuf::from(path));
        }
        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS) {
            settings.poll_interval_ms = parse_number(ENV_POLL_INTERVAL_MS, &ms)?;
        }
        if let Some(secs) = lookup(ENV_POLL_TIMEOUT_SECS) {
            settings.poll_timeout_secs = parse_number(ENV_POLL_TIMEOUT_SECS, &secs)?;
        }
        if let Some(secs) = lookup(ENV_RUN_TIMEOUT_SECS) {
            settings.run_timeout_secs = Some(parse_number(ENV_RUN_TIMEOUT_SECS, &secs)?);
        }
        if let Some(budget) = lookup(ENV_CHILD_BUDGET) {
            settings.child_budget = budget.parse()?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings no run could work with
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::config("poll interval must be greater than zero"));
        }
        if self.poll_timeout_secs == 0 {
            return Err(Error::config("poll timeout must be greater than zero"));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(Error::config("run timeout must be greater than zero"));
        }
        if self.field_manager.trim().is_empty() {
            return Err(Error::config("field manager must not be empty"));
        }
        Ok(())
    }

    /// Interval and default budget for polls
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_secs(self.poll_timeout_secs),
        }
    }

    /// Deadline for a feature run, if any
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|e| Error::config(format!("{} must be a whole number, got {:?}: {}", key, raw, e)))
}
