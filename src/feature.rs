//! Steps, fail-fast composition, and feature runs
//!
//! A feature is an ordered list of named phases: setup phases first, then
//! assessment phases. Each phase is a step, usually an [`AllOf`] of smaller
//! steps. Everything runs strictly in order on one task, and the first
//! failure ends the run so it can be attributed to exactly one step.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::env::EnvConfig;
use crate::{Error, Result};

// =============================================================================
// Context and reporting
// =============================================================================

/// Per-run context threaded through every step
///
/// Carries the run's cancellation token and a small bag of string values
/// that earlier steps hand to later ones.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancel: CancellationToken,
    values: BTreeMap<String, String>,
}

impl Context {
    /// Fresh context with its own cancellation token
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh context bound to an existing token
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            values: BTreeMap::new(),
        }
    }

    /// Token that fires when the run is aborted
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the run has been aborted
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return a context with `key` set to `value`
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Look up a value set by an earlier step
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// A line logged by a step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Step that logged it
    pub step: String,
    /// The message
    pub message: String,
}

/// Reporting handle given to each step
///
/// Lines are forwarded to `tracing` and kept for the feature report.
#[derive(Clone, Debug)]
pub struct Reporter {
    feature: String,
    step: String,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Reporter {
    /// Reporter for a feature, before any step runs
    pub fn new(feature: impl Into<String>) -> Self {
        let feature = feature.into();
        Self {
            step: feature.clone(),
            feature,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Same log, attributed to `step`
    pub fn for_step(&self, step: impl Into<String>) -> Self {
        Self {
            feature: self.feature.clone(),
            step: step.into(),
            entries: self.entries.clone(),
        }
    }

    /// Name of the step this reporter is attributed to
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Record a line
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!(feature = %self.feature, step = %self.step, "{}", message);
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(LogEntry {
                step: self.step.clone(),
                message,
            });
    }

    /// Everything logged so far, in order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

// =============================================================================
// Steps
// =============================================================================

/// A unit of work in a feature run
#[async_trait]
pub trait Step: Send + Sync {
    /// Run the step, returning the (possibly extended) context
    async fn run(&self, ctx: Context, reporter: &Reporter, env: &EnvConfig) -> Result<Context>;
}

/// A step built from a closure
pub struct FnStep<F>(F);

/// Wrap a closure as a step.
///
/// The closure gets owned copies of the reporter and configuration so it can
/// return a `'static` future.
pub fn step_fn<F, Fut>(f: F) -> FnStep<F>
where
    F: Fn(Context, Reporter, EnvConfig) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Context>> + Send + 'static,
{
    FnStep(f)
}

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(Context, Reporter, EnvConfig) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Context>> + Send + 'static,
{
    async fn run(&self, ctx: Context, reporter: &Reporter, env: &EnvConfig) -> Result<Context> {
        (self.0)(ctx, reporter.clone(), env.clone()).await
    }
}

/// A step paired with its name
pub struct NamedStep {
    name: String,
    step: Box<dyn Step>,
}

impl NamedStep {
    /// Name a step
    pub fn new(name: impl Into<String>, step: impl Step + 'static) -> Self {
        Self {
            name: name.into(),
            step: Box::new(step),
        }
    }

    /// The step's name
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: Context, reporter: &Reporter, env: &EnvConfig) -> Result<Context> {
        if ctx.is_cancelled() {
            return Err(Error::step_failure(
                &self.name,
                Error::cancelled(format!("start of step {}", self.name)),
            ));
        }
        let reporter = reporter.for_step(&self.name);
        self.step
            .run(ctx, &reporter, env)
            .await
            .map_err(|e| Error::step_failure(&self.name, e))
    }
}

impl fmt::Debug for NamedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedStep").field("name", &self.name).finish()
    }
}

/// Sequential fail-fast composition
///
/// Sub-steps run strictly in order. The first failure stops the composition;
/// later sub-steps never run, and the error names the failing sub-step.
#[derive(Debug, Default)]
pub struct AllOf {
    steps: Vec<NamedStep>,
}

impl AllOf {
    /// Empty composition; succeeds without doing anything
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named sub-step
    pub fn then(mut self, name: impl Into<String>, step: impl Step + 'static) -> Self {
        self.steps.push(NamedStep::new(name, step));
        self
    }

    /// Number of sub-steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether there are no sub-steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Compose named steps into one fail-fast step
pub fn all_of(steps: impl IntoIterator<Item = NamedStep>) -> AllOf {
    AllOf {
        steps: steps.into_iter().collect(),
    }
}

#[async_trait]
impl Step for AllOf {
    async fn run(&self, mut ctx: Context, reporter: &Reporter, env: &EnvConfig) -> Result<Context> {
        for step in &self.steps {
            ctx = step.run(ctx, reporter, env).await?;
        }
        Ok(ctx)
    }
}

// =============================================================================
// Features
// =============================================================================

/// Lifecycle of a feature run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureState {
    /// Built but not yet run
    Pending,
    /// Phases are executing
    Running,
    /// Every phase passed
    Succeeded,
    /// A phase failed; later phases were skipped
    Failed,
}

/// Which part of the feature a phase belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseKind {
    /// Preparation
    Setup,
    /// Assertion
    Assess,
}

/// Outcome of a single phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Ran and succeeded
    Passed,
    /// Ran and failed
    Failed,
    /// Not run because an earlier phase failed
    Skipped,
}

/// Record of one phase in a run
#[derive(Clone, Debug)]
pub struct PhaseResult {
    /// Phase name
    pub name: String,
    /// Setup or assessment
    pub kind: PhaseKind,
    /// What happened
    pub outcome: PhaseOutcome,
    /// Wall-clock time spent
    pub duration: Duration,
}

/// The single failure that ended a run
#[derive(Debug)]
pub struct Failure {
    /// Phase that failed
    pub phase: String,
    /// Innermost step that failed
    pub step: String,
    /// The error, wrapped in its step chain
    pub error: Error,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "phase {} failed at step {}: {}",
            self.phase,
            self.step,
            self.error.root_cause()
        )
    }
}

/// An ordered set of setup and assessment phases
pub struct Feature {
    name: String,
    labels: BTreeMap<String, String>,
    phases: Vec<(PhaseKind, NamedStep)>,
    state: FeatureState,
}

impl Feature {
    /// Start building a feature
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            phases: Vec::new(),
            state: FeatureState::Pending,
        }
    }

    /// Attach a label, e.g. the area under test
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a setup phase
    pub fn with_setup(mut self, name: impl Into<String>, step: impl Step + 'static) -> Self {
        self.phases
            .push((PhaseKind::Setup, NamedStep::new(name, step)));
        self
    }

    /// Add an assessment phase
    pub fn assess(mut self, name: impl Into<String>, step: impl Step + 'static) -> Self {
        self.phases
            .push((PhaseKind::Assess, NamedStep::new(name, step)));
        self
    }

    /// Feature name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Feature labels
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Current lifecycle state
    pub fn state(&self) -> FeatureState {
        self.state
    }

    /// Execute the feature once.
    ///
    /// Setup phases run before assessment phases regardless of the order
    /// they were added in; within each group registration order is kept.
    pub async fn run(mut self, ctx: Context, env: &EnvConfig) -> FeatureReport {
        self.state = FeatureState::Running;
        info!(feature = %self.name, labels = ?self.labels, "running feature");

        let reporter = Reporter::new(&self.name);
        let mut phases: Vec<(PhaseKind, NamedStep)> = std::mem::take(&mut self.phases);
        // stable: keeps registration order within each kind
        phases.sort_by_key(|(kind, _)| *kind == PhaseKind::Assess);

        let mut results = Vec::with_capacity(phases.len());
        let mut failure = None;
        let mut ctx = Some(ctx);

        for (kind, phase) in &phases {
            let current = match (failure.is_none(), ctx.take()) {
                (true, Some(current)) => current,
                (_, leftover) => {
                    ctx = leftover;
                    results.push(PhaseResult {
                        name: phase.name().to_string(),
                        kind: *kind,
                        outcome: PhaseOutcome::Skipped,
                        duration: Duration::ZERO,
                    });
                    continue;
                }
            };

            let start = Instant::now();
            info!(feature = %self.name, phase = %phase.name(), kind = ?kind, "starting phase");
            let outcome = phase.run(current, &reporter, env).await;
            let duration = start.elapsed();

            match outcome {
                Ok(next) => {
                    ctx = Some(next);
                    results.push(PhaseResult {
                        name: phase.name().to_string(),
                        kind: *kind,
                        outcome: PhaseOutcome::Passed,
                        duration,
                    });
                }
                Err(err) => {
                    let step = err.failed_step().unwrap_or(phase.name()).to_string();
                    error!(
                        feature = %self.name,
                        phase = %phase.name(),
                        step = %step,
                        error = %err,
                        "phase failed"
                    );
                    results.push(PhaseResult {
                        name: phase.name().to_string(),
                        kind: *kind,
                        outcome: PhaseOutcome::Failed,
                        duration,
                    });
                    failure = Some(Failure {
                        phase: phase.name().to_string(),
                        step,
                        error: err,
                    });
                }
            }
        }

        self.state = if failure.is_some() {
            FeatureState::Failed
        } else {
            FeatureState::Succeeded
        };

        FeatureReport {
            feature: self.name,
            state: self.state,
            phases: results,
            failure,
            logs: reporter.entries(),
            context: ctx,
        }
    }
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("labels", &self.labels)
            .field("phases", &self.phases.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Result of running a feature
#[derive(Debug)]
pub struct FeatureReport {
    /// Feature name
    pub feature: String,
    /// Final state, `Succeeded` or `Failed`
    pub state: FeatureState,
    /// Every phase in execution order, including skipped ones
    pub phases: Vec<PhaseResult>,
    /// The first failure, if any
    pub failure: Option<Failure>,
    /// Lines logged by steps
    pub logs: Vec<LogEntry>,
    /// Context after the last successful phase; `None` after a failure
    pub context: Option<Context>,
}

impl FeatureReport {
    /// Whether every phase passed
    pub fn passed(&self) -> bool {
        self.state == FeatureState::Succeeded
    }

    /// Emit a PASS/FAIL table for the run
    pub fn log_summary(&self) {
        info!("========================================");
        info!("  {}", self.feature.to_uppercase());
        info!("========================================");
        for phase in &self.phases {
            let tag = match phase.outcome {
                PhaseOutcome::Passed => "PASS",
                PhaseOutcome::Failed => "FAIL",
                PhaseOutcome::Skipped => "SKIP",
            };
            info!(
                "  {tag}  {:40} {:.1}s",
                phase.name,
                phase.duration.as_secs_f64()
            );
        }
        if let Some(failure) = &self.failure {
            info!("        -> {}", failure);
        }
        info!("========================================");
    }

    /// Convert into the final context, or the failure's error
    pub fn into_result(self) -> Result<Context> {
        match (self.failure, self.context) {
            (Some(failure), _) => Err(failure.error),
            (None, Some(ctx)) => Ok(ctx),
            (None, None) => Err(Error::config(format!(
                "feature {} finished without a context",
                self.feature
            ))),
        }
    }
}
