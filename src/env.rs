//! Per-run configuration and the environment that drives features

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::feature::{Context, Feature, FeatureReport};
use crate::poll::PollConfig;
use crate::resolve::{ChildBudget, Resolver};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::store::{create_client, KubeStore, ObjectStore, ObjectWriter};
use crate::{Error, Result};

/// Immutable configuration handed to every step
#[derive(Clone)]
pub struct EnvConfig {
    /// Namespace the run operates in
    pub namespace: String,
    /// Read access to the system under test
    pub store: Arc<dyn ObjectStore>,
    /// Write access for setup steps
    pub writer: Option<Arc<dyn ObjectWriter>>,
    /// Interval and default budget for polls
    pub poll: PollConfig,
    /// How sibling children share a timeout
    pub child_budget: ChildBudget,
}

impl EnvConfig {
    /// Read-only configuration with default polling
    pub fn new(namespace: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            namespace: namespace.into(),
            store,
            writer: None,
            poll: PollConfig::default(),
            child_budget: ChildBudget::default(),
        }
    }

    /// Allow setup steps to write through `writer`
    pub fn with_writer(mut self, writer: Arc<dyn ObjectWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Override the poll interval and default budget
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Override the child budget policy
    pub fn with_child_budget(mut self, budget: ChildBudget) -> Self {
        self.child_budget = budget;
        self
    }

    /// The configured writer, or a `Config` error for read-only runs
    pub fn writer(&self) -> Result<&dyn ObjectWriter> {
        self.writer
            .as_deref()
            .ok_or_else(|| Error::config("no object writer configured for this environment"))
    }

    /// A resolver over this environment's store, cancelled with `ctx`
    pub fn resolver(&self, ctx: &Context) -> Resolver<'_> {
        Resolver::new(self.store.as_ref(), self.poll)
            .with_budget(self.child_budget)
            .with_cancellation(ctx.cancellation().clone())
    }

    /// Connect to the cluster described by `settings`.
    ///
    /// The API server is asked for its version so an unreachable cluster is
    /// noticed here, with backoff, instead of in the first assertion.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let kubeconfig = settings.kubeconfig.as_deref();

        let client = retry_with_backoff(&RetryConfig::default(), "connect", || async move {
            let client = create_client(kubeconfig).await?;
            let version = client.apiserver_version().await?;
            info!(version = %version.git_version, "connected to API server");
            Ok::<_, Error>(client)
        })
        .await?;

        let store = Arc::new(KubeStore::new(client, &settings.field_manager));
        Ok(Self {
            namespace: settings.namespace.clone(),
            store: store.clone(),
            writer: Some(store),
            poll: settings.poll_config(),
            child_budget: settings.child_budget,
        })
    }
}

impl fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvConfig")
            .field("namespace", &self.namespace)
            .field("writable", &self.writer.is_some())
            .field("poll", &self.poll)
            .field("child_budget", &self.child_budget)
            .finish()
    }
}

/// Runs features against one configured environment
#[derive(Debug)]
pub struct Environment {
    config: EnvConfig,
    run_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Environment {
    /// Environment without a run deadline
    pub fn new(config: EnvConfig) -> Self {
        Self {
            config,
            run_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Connect using `settings`, including its run deadline
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let config = EnvConfig::connect(settings).await?;
        let mut env = Self::new(config);
        env.run_timeout = settings.run_timeout();
        Ok(env)
    }

    /// Abort each feature run after `timeout`
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// The configuration steps see
    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Cancelling this token aborts the current and all future runs
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `feature` once and log its summary.
    ///
    /// When the run deadline passes, the context token is cancelled: any
    /// in-flight poll returns `Cancelled` at once and no further step starts.
    pub async fn test(&self, feature: Feature) -> FeatureReport {
        let token = self.cancel.child_token();
        let deadline = self.run_timeout.map(|timeout| {
            let token = token.clone();
            let name = feature.name().to_string();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(feature = %name, timeout_secs = timeout.as_secs(), "run deadline reached, cancelling");
                token.cancel();
            })
        });

        let report = feature
            .run(Context::with_cancellation(token), &self.config)
            .await;

        if let Some(handle) = deadline {
            handle.abort();
        }
        report.log_summary();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Exists;
    use crate::feature::{step_fn, FeatureState, Reporter};
    use crate::object::{ObjectRef, UntypedObject};
    use crate::store::{MockObjectStore, MockObjectWriter};
    use serde_json::json;
    use tokio::time::Instant;

    fn nop(name: &str) -> ObjectRef {
        ObjectRef::new(name, "default", "nop.crossplane.io/v1alpha1", "NopResource")
    }

    #[test]
    fn read_only_config_has_no_writer() {
        let config = EnvConfig::new("default", Arc::new(MockObjectStore::new()));
        assert!(matches!(config.writer(), Err(Error::Config { .. })));

        let config = config.with_writer(Arc::new(MockObjectWriter::new()));
        assert!(config.writer().is_ok());
    }

    /// Story: a claim that never shows up is abandoned when the run deadline
    /// passes, long before the five minute condition budget.
    #[tokio::test(start_paused = true)]
    async fn story_run_deadline_interrupts_a_poll() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .returning(|r| Err(Error::not_found(r)));
        let config = EnvConfig::new("default", Arc::new(store));
        let env = Environment::new(config).with_run_timeout(Duration::from_secs(10));

        let feature = Feature::new("ClaimAppears").assess(
            "claim-exists",
            step_fn(|ctx: Context, _r: Reporter, env: EnvConfig| async move {
                env.resolver(&ctx)
                    .wait_for(&nop("claim"), &Exists, Duration::from_secs(300))
                    .await?;
                Ok(ctx)
            }),
        );

        let start = Instant::now();
        let report = env.test(feature).await;

        assert_eq!(report.state, FeatureState::Failed);
        assert!(start.elapsed() < Duration::from_secs(11));
        let failure = report.failure.unwrap();
        assert_eq!(failure.step, "claim-exists");
        assert!(matches!(failure.error.root_cause(), Error::Cancelled { .. }));
    }

    /// Store whose reads hang, like an API server that accepted the
    /// connection and never answered.
    struct StalledStore;

    #[async_trait::async_trait]
    impl ObjectStore for StalledStore {
        async fn get(&self, obj_ref: &ObjectRef) -> Result<UntypedObject> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(Error::not_found(obj_ref))
        }
    }

    /// Story: the cluster stops answering mid-run. The run deadline still
    /// ends the feature on time instead of waiting out the hung read.
    #[tokio::test(start_paused = true)]
    async fn story_run_deadline_interrupts_a_stalled_read() {
        let env = Environment::new(EnvConfig::new("default", Arc::new(StalledStore)))
            .with_run_timeout(Duration::from_secs(2));

        let feature = Feature::new("ClaimAppears").assess(
            "claim-exists",
            step_fn(|ctx: Context, _r: Reporter, env: EnvConfig| async move {
                env.resolver(&ctx)
                    .wait_for(&nop("claim"), &Exists, Duration::from_secs(300))
                    .await?;
                Ok(ctx)
            }),
        );

        let start = Instant::now();
        let report = env.test(feature).await;

        assert!(start.elapsed() < Duration::from_secs(3), "{:?}", start.elapsed());
        let failure = report.failure.unwrap();
        assert!(matches!(failure.error.root_cause(), Error::Cancelled { .. }));
    }

    /// Story: a condition budget shorter than a hung read ends the step with
    /// a timeout at the budget, not when the read finally returns.
    #[tokio::test(start_paused = true)]
    async fn story_condition_budget_bounds_a_stalled_read() {
        let env = Environment::new(EnvConfig::new("default", Arc::new(StalledStore)));

        let feature = Feature::new("ClaimAppears").assess(
            "claim-exists",
            step_fn(|ctx: Context, _r: Reporter, env: EnvConfig| async move {
                env.resolver(&ctx)
                    .wait_for(&nop("claim"), &Exists, Duration::from_secs(5))
                    .await?;
                Ok(ctx)
            }),
        );

        let start = Instant::now();
        let report = env.test(feature).await;

        assert!(start.elapsed() < Duration::from_secs(6), "{:?}", start.elapsed());
        match report.failure.unwrap().error.root_cause() {
            Error::Timeout { timeout, .. } => assert_eq!(*timeout, Duration::from_secs(5)),
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_without_deadline_pass_through() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|r| {
            UntypedObject::new(json!({
                "apiVersion": r.api_version,
                "kind": r.kind,
                "metadata": {"name": r.name, "namespace": r.namespace}
            }))
        });
        let env = Environment::new(EnvConfig::new("default", Arc::new(store)));

        let feature = Feature::new("ClaimAppears").assess(
            "claim-exists",
            step_fn(|ctx: Context, _r: Reporter, env: EnvConfig| async move {
                env.resolver(&ctx)
                    .wait_for(&nop("claim"), &Exists, Duration::from_secs(5))
                    .await?;
                Ok(ctx.with_value("claim", "present"))
            }),
        );

        let ctx = env.test(feature).await.into_result().unwrap();
        assert_eq!(ctx.value("claim"), Some("present"));
    }

    #[tokio::test]
    async fn external_cancellation_fails_the_run() {
        let env = Environment::new(EnvConfig::new("default", Arc::new(MockObjectStore::new())));
        env.cancellation_token().cancel();

        let report = env
            .test(Feature::new("noop").assess(
                "anything",
                step_fn(|ctx: Context, _r: Reporter, _env: EnvConfig| async move { Ok(ctx) }),
            ))
            .await;

        assert_eq!(report.state, FeatureState::Failed);
    }
}
