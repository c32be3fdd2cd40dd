//! Ready-made assertion steps
//!
//! Each step polls through the environment's store with the context's
//! cancellation token, so a run deadline stops it promptly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::condition::{Condition, Exists};
use crate::env::EnvConfig;
use crate::feature::{Context, Reporter, Step};
use crate::manifest;
use crate::object::ObjectRef;
use crate::poll::PollConfig;
use crate::resolve::ReferenceChain;
use crate::Result;

/// Wait for a single object to satisfy a condition
pub struct ResourceCondition {
    target: ObjectRef,
    condition: Arc<dyn Condition>,
    timeout: Duration,
}

/// Wait until `target` can be fetched
pub fn resource_exists_within(timeout: Duration, target: ObjectRef) -> ResourceCondition {
    resource_has_condition_within(timeout, target, Exists)
}

/// Wait until `target` satisfies `condition`.
///
/// The object not existing yet counts as "not satisfied yet".
pub fn resource_has_condition_within(
    timeout: Duration,
    target: ObjectRef,
    condition: impl Condition + 'static,
) -> ResourceCondition {
    ResourceCondition {
        target,
        condition: Arc::new(condition),
        timeout,
    }
}

#[async_trait]
impl Step for ResourceCondition {
    async fn run(&self, ctx: Context, reporter: &Reporter, env: &EnvConfig) -> Result<Context> {
        env.resolver(&ctx)
            .wait_for(&self.target, self.condition.as_ref(), self.timeout)
            .await?;
        reporter.log(format!(
            "{} has {}",
            self.target,
            self.condition.describe()
        ));
        Ok(ctx)
    }
}

/// Resolve a reference chain and wait for every terminal object
pub struct ChainCondition {
    chain: ReferenceChain,
    condition: Arc<dyn Condition>,
    timeout: Duration,
}

/// Follow `chain` and wait for `condition` on each object it ends at.
///
/// An empty terminal set passes. How `timeout` is split between siblings
/// follows the environment's child budget.
pub fn chain_satisfies_within(
    chain: ReferenceChain,
    condition: impl Condition + 'static,
    timeout: Duration,
) -> ChainCondition {
    ChainCondition {
        chain,
        condition: Arc::new(condition),
        timeout,
    }
}

#[async_trait]
impl Step for ChainCondition {
    async fn run(&self, ctx: Context, reporter: &Reporter, env: &EnvConfig) -> Result<Context> {
        let poll = PollConfig {
            interval: env.poll.interval,
            timeout: self.timeout,
        };
        let scoped = env.clone().with_poll(poll);
        let targets = scoped
            .resolver(&ctx)
            .assert_all(&self.chain, self.condition.as_ref())
            .await?;
        reporter.log(format!(
            "{} object(s) under {} have {}",
            targets.len(),
            self.chain.root,
            self.condition.describe()
        ));
        Ok(ctx)
    }
}

/// Create or update every object in a set of manifest files
pub struct ApplyResources {
    dir: PathBuf,
    pattern: String,
}

/// Apply the manifests under `dir` matching `pattern`, in file order.
///
/// Objects without a namespace land in the environment's namespace. The
/// first failed write stops the step.
pub fn apply_resources(dir: impl Into<PathBuf>, pattern: impl Into<String>) -> ApplyResources {
    ApplyResources {
        dir: dir.into(),
        pattern: pattern.into(),
    }
}

#[async_trait]
impl Step for ApplyResources {
    async fn run(&self, ctx: Context, reporter: &Reporter, env: &EnvConfig) -> Result<Context> {
        let writer = env.writer()?;
        let objects = manifest::load(&self.dir, &self.pattern)?;

        for object in &objects {
            writer.apply(object, &env.namespace).await?;
            reporter.log(format!("applied {}", object.describe()));
        }

        info!(
            dir = %self.dir.display(),
            pattern = %self.pattern,
            count = objects.len(),
            "applied manifests"
        );
        Ok(ctx)
    }
}

/// Wait for every object named by a set of manifest files
pub struct ManifestCondition {
    dir: PathBuf,
    pattern: String,
    condition: Arc<dyn Condition>,
    timeout: Duration,
}

/// Wait until every object in the matching manifests can be fetched
pub fn resources_created_within(
    timeout: Duration,
    dir: impl Into<PathBuf>,
    pattern: impl Into<String>,
) -> ManifestCondition {
    resources_have_condition_within(timeout, dir, pattern, Exists)
}

/// Wait until every object in the matching manifests satisfies `condition`.
///
/// Objects are checked one after another, each with the full `timeout`.
pub fn resources_have_condition_within(
    timeout: Duration,
    dir: impl Into<PathBuf>,
    pattern: impl Into<String>,
    condition: impl Condition + 'static,
) -> ManifestCondition {
    ManifestCondition {
        dir: dir.into(),
        pattern: pattern.into(),
        condition: Arc::new(condition),
        timeout,
    }
}

#[async_trait]
impl Step for ManifestCondition {
    async fn run(&self, ctx: Context, reporter: &Reporter, env: &EnvConfig) -> Result<Context> {
        let objects = manifest::load(&self.dir, &self.pattern)?;
        let targets = manifest::refs(&objects, &env.namespace)?;
        let resolver = env.resolver(&ctx);

        for target in &targets {
            resolver
                .wait_for(target, self.condition.as_ref(), self.timeout)
                .await?;
        }
        reporter.log(format!(
            "{} object(s) from {} have {}",
            targets.len(),
            self.dir.join(&self.pattern).display(),
            self.condition.describe()
        ));
        Ok(ctx)
    }
}
