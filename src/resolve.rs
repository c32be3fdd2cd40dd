//! Reference chasing across chains of dependent objects
//!
//! A claim points at a composite, the composite points at managed resources,
//! and so on. The chain is described as a root reference plus a list of hops;
//! each hop names the field holding the next coordinates and whether it holds
//! one reference or a sequence of them.
//!
//! Intermediate objects are fetched once: they must exist by the time the
//! chain is walked. Terminal objects are polled until the condition holds,
//! one child at a time, in the order the parent lists them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::condition::Condition;
use crate::field::{string_map, string_map_sequence, FieldPath};
use crate::object::ObjectRef;
use crate::poll::{poll_until, PollConfig};
use crate::store::ObjectStore;
use crate::{Error, Result};

/// How many references a hop's field holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    /// A single mapping, e.g. `spec.resourceRef`
    One,
    /// A sequence of mappings, e.g. `spec.resourceRefs`
    Many,
}

/// One step along a reference chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hop {
    /// Field holding the reference(s)
    pub path: FieldPath,
    /// Shape of the field
    pub cardinality: Cardinality,
}

/// Root reference plus the hops to follow from it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceChain {
    /// Where the walk starts
    pub root: ObjectRef,
    /// Hops in order; empty means the root itself is checked
    pub hops: Vec<Hop>,
}

impl ReferenceChain {
    /// Start a chain at `root`
    pub fn new(root: ObjectRef) -> Self {
        Self {
            root,
            hops: Vec::new(),
        }
    }

    /// Follow a single reference held at `path`
    pub fn follow_one(mut self, path: FieldPath) -> Self {
        self.hops.push(Hop {
            path,
            cardinality: Cardinality::One,
        });
        self
    }

    /// Follow every reference in the sequence held at `path`
    pub fn follow_many(mut self, path: FieldPath) -> Self {
        self.hops.push(Hop {
            path,
            cardinality: Cardinality::Many,
        });
        self
    }
}

/// How the poll timeout is shared between sibling children
///
/// Settings files and environment variables accept the same spellings,
/// case-insensitively.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ChildBudget {
    /// Every child gets the full timeout
    #[default]
    PerChild,
    /// All children share one deadline measured from the first check
    Shared,
}

impl FromStr for ChildBudget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "per-child" | "perchild" => Ok(Self::PerChild),
            "shared" => Ok(Self::Shared),
            other => Err(Error::config(format!("unknown child budget {:?}", other))),
        }
    }
}

impl TryFrom<String> for ChildBudget {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for ChildBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildBudget::PerChild => f.write_str("per-child"),
            ChildBudget::Shared => f.write_str("shared"),
        }
    }
}

/// Walks reference chains against an object store
pub struct Resolver<'a> {
    store: &'a dyn ObjectStore,
    poll: PollConfig,
    budget: ChildBudget,
    cancel: CancellationToken,
}

impl<'a> Resolver<'a> {
    /// Create a resolver polling with `poll`
    pub fn new(store: &'a dyn ObjectStore, poll: PollConfig) -> Self {
        Self {
            store,
            poll,
            budget: ChildBudget::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Set how sibling children share the timeout
    pub fn with_budget(mut self, budget: ChildBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Interrupt in-progress polls when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Follow every hop and return the terminal references.
    ///
    /// Every object along the way is fetched exactly once; a missing object or
    /// malformed reference field aborts the walk.
    pub async fn resolve(&self, chain: &ReferenceChain) -> Result<Vec<ObjectRef>> {
        chain.root.validate()?;
        let mut current = vec![chain.root.clone()];

        for (depth, hop) in chain.hops.iter().enumerate() {
            let mut next = Vec::new();
            for parent in &current {
                let children = self.children_of(parent, hop).await?;
                debug!(
                    depth,
                    parent = %parent,
                    path = %hop.path,
                    children = children.len(),
                    "followed references"
                );
                next.extend(children);
            }
            current = next;
        }

        Ok(current)
    }

    /// Resolve the chain, then wait for `condition` on every terminal object.
    ///
    /// Children are checked one at a time. The first child that never
    /// satisfies the condition fails the call with a `Timeout` naming it.
    /// Returns the terminal references on success.
    pub async fn assert_all(
        &self,
        chain: &ReferenceChain,
        condition: &dyn Condition,
    ) -> Result<Vec<ObjectRef>> {
        let targets = self.resolve(chain).await?;
        if targets.is_empty() {
            warn!(root = %chain.root, "reference chain resolved to no objects");
            return Ok(targets);
        }

        let deadline = Instant::now() + self.poll.timeout;
        for target in &targets {
            let timeout = match self.budget {
                ChildBudget::PerChild => self.poll.timeout,
                ChildBudget::Shared => deadline.saturating_duration_since(Instant::now()),
            };
            self.wait_for(target, condition, timeout).await?;
            info!(resource = %target, condition = %condition.describe(), "condition satisfied");
        }

        Ok(targets)
    }

    /// Poll a single object until `condition` holds.
    ///
    /// Absence is treated as "not yet": the object may still be on its way.
    /// Any other store failure or a structural mismatch aborts at once.
    pub async fn wait_for(
        &self,
        target: &ObjectRef,
        condition: &dyn Condition,
        timeout: Duration,
    ) -> Result<()> {
        target.validate()?;
        let description = format!("{} on {}", condition.describe(), target);
        let config = PollConfig {
            interval: self.poll.interval,
            timeout,
        };
        let store = self.store;

        poll_until(&description, &config, &self.cancel, || async move {
            match store.get(target).await {
                Ok(object) => condition.check(&object),
                Err(Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn children_of(&self, parent: &ObjectRef, hop: &Hop) -> Result<Vec<ObjectRef>> {
        let object = self.store.get(parent).await?;
        match hop.cardinality {
            Cardinality::One => {
                let fields = string_map(&object, &hop.path)?;
                Ok(vec![child_ref(parent, &fields, &hop.path.to_string())?])
            }
            Cardinality::Many => string_map_sequence(&object, &hop.path)?
                .iter()
                .enumerate()
                .map(|(i, fields)| child_ref(parent, fields, &format!("{}[{}]", hop.path, i)))
                .collect(),
        }
    }
}

/// Build a child reference from an extracted mapping.
///
/// `name`, `apiVersion` and `kind` are required; `namespace` falls back to the
/// parent's namespace.
fn child_ref(
    parent: &ObjectRef,
    fields: &BTreeMap<String, String>,
    path: &str,
) -> Result<ObjectRef> {
    let required = |key: &str| -> Result<String> {
        match fields.get(key) {
            Some(v) if !v.is_empty() => Ok(v.clone()),
            _ => Err(Error::field_not_found(
                parent.to_string(),
                format!("{}.{}", path, key),
            )),
        }
    };

    let namespace = fields
        .get("namespace")
        .filter(|ns| !ns.is_empty())
        .cloned()
        .unwrap_or_else(|| parent.namespace.clone());

    let child = ObjectRef::new(
        required("name")?,
        namespace,
        required("apiVersion")?,
        required("kind")?,
    );
    child.validate()?;
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::LabelEquals;
    use crate::object::UntypedObject;
    use crate::store::MockObjectStore;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const NOP_API: &str = "nop.crossplane.io/v1alpha1";
    const LABEL: &str = "processed";

    fn claim_ref() -> ObjectRef {
        ObjectRef::new("claim", "default", "nop.example.org/v1alpha1", "NopResource")
    }

    fn chain() -> ReferenceChain {
        ReferenceChain::new(claim_ref())
            .follow_one(FieldPath::new(["spec", "resourceRef"]))
            .follow_many(FieldPath::new(["spec", "resourceRefs"]))
    }

    fn poll() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
        }
    }

    fn claim() -> Value {
        json!({
            "apiVersion": "nop.example.org/v1alpha1",
            "kind": "NopResource",
            "metadata": {"name": "claim", "namespace": "default"},
            "spec": {"resourceRef": {"name": "xr-1", "apiVersion": "x.example.org/v1", "kind": "Composed"}}
        })
    }

    fn composite(refs: Value) -> Value {
        json!({
            "apiVersion": "x.example.org/v1",
            "kind": "Composed",
            "metadata": {"name": "xr-1"},
            "spec": {"resourceRefs": refs}
        })
    }

    fn managed(name: &str, labelled: bool) -> Value {
        let labels = if labelled {
            json!({ LABEL: "true" })
        } else {
            json!({})
        };
        json!({
            "apiVersion": NOP_API,
            "kind": "NopResource",
            "metadata": {"name": name, "namespace": "default", "labels": labels}
        })
    }

    /// Mock store serving the claim and composite, with managed resources that
    /// become labelled after `ready_after[name]` reads.
    fn store_with(
        refs: Value,
        ready_after: HashMap<&'static str, u32>,
    ) -> (MockObjectStore, Arc<HashMap<String, AtomicU32>>) {
        let reads: Arc<HashMap<String, AtomicU32>> = Arc::new(
            ready_after
                .keys()
                .map(|k| (k.to_string(), AtomicU32::new(0)))
                .collect(),
        );
        let counter = reads.clone();
        let ready_after: HashMap<String, u32> =
            ready_after.into_iter().map(|(k, v)| (k.to_string(), v)).collect();

        let mut store = MockObjectStore::new();
        store.expect_get().returning(move |r| {
            let value = match (r.kind.as_str(), r.name.as_str()) {
                ("NopResource", "claim") => claim(),
                ("Composed", "xr-1") => composite(refs.clone()),
                ("NopResource", name) => match counter.get(name) {
                    Some(count) => {
                        let n = count.fetch_add(1, Ordering::SeqCst) + 1;
                        managed(name, n >= ready_after[name])
                    }
                    None => return Err(Error::not_found(r)),
                },
                _ => return Err(Error::not_found(r)),
            };
            UntypedObject::new(value)
        });
        (store, reads)
    }

    fn two_refs() -> Value {
        json!([
            {"name": "mr-a", "apiVersion": NOP_API, "kind": "NopResource"},
            {"name": "mr-b", "apiVersion": NOP_API, "kind": "NopResource"}
        ])
    }

    #[tokio::test]
    async fn resolves_claim_to_managed_resources() {
        let (store, _) = store_with(two_refs(), HashMap::from([("mr-a", 1), ("mr-b", 1)]));
        let resolver = Resolver::new(&store, poll());

        let targets = resolver.resolve(&chain()).await.unwrap();

        assert_eq!(
            targets,
            vec![
                ObjectRef::new("mr-a", "default", NOP_API, "NopResource"),
                ObjectRef::new("mr-b", "default", NOP_API, "NopResource"),
            ]
        );
    }

    #[tokio::test]
    async fn explicit_namespace_overrides_inherited_one() {
        let refs = json!([{"name": "mr-a", "namespace": "crossplane-system", "apiVersion": NOP_API, "kind": "NopResource"}]);
        let (store, _) = store_with(refs, HashMap::new());
        let resolver = Resolver::new(&store, poll());

        let targets = resolver.resolve(&chain()).await.unwrap();
        assert_eq!(targets[0].namespace, "crossplane-system");
    }

    #[tokio::test]
    async fn chain_without_hops_targets_the_root() {
        let (store, _) = store_with(two_refs(), HashMap::new());
        let resolver = Resolver::new(&store, poll());

        let targets = resolver
            .resolve(&ReferenceChain::new(claim_ref()))
            .await
            .unwrap();
        assert_eq!(targets, vec![claim_ref()]);
    }

    #[tokio::test(start_paused = true)]
    async fn all_children_converging_at_different_times_succeeds() {
        let (store, reads) =
            store_with(two_refs(), HashMap::from([("mr-a", 3), ("mr-b", 10)]));
        let resolver = Resolver::new(&store, poll());

        let targets = resolver
            .assert_all(&chain(), &LabelEquals::new(LABEL, "true"))
            .await
            .unwrap();

        assert_eq!(targets.len(), 2);
        assert_eq!(reads["mr-a"].load(Ordering::SeqCst), 3);
        assert_eq!(reads["mr-b"].load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn child_that_never_converges_is_named_in_the_timeout() {
        let (store, _) =
            store_with(two_refs(), HashMap::from([("mr-a", 1), ("mr-b", u32::MAX)]));
        let resolver = Resolver::new(&store, poll());

        let err = resolver
            .assert_all(&chain(), &LabelEquals::new(LABEL, "true"))
            .await
            .unwrap_err();

        match err {
            Error::Timeout { what, .. } => {
                assert!(what.contains("mr-b"), "{}", what);
                assert!(what.contains("label processed=true"), "{}", what);
                assert!(!what.contains("mr-a"), "{}", what);
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shared_budget_is_consumed_by_earlier_children() {
        // mr-a needs 4s of the 5s budget; mr-b needs 2s more
        let (store, _) =
            store_with(two_refs(), HashMap::from([("mr-a", 40), ("mr-b", 20)]));

        let per_child = Resolver::new(&store, poll());
        assert!(per_child
            .assert_all(&chain(), &LabelEquals::new(LABEL, "true"))
            .await
            .is_ok());

        let (store, _) =
            store_with(two_refs(), HashMap::from([("mr-a", 40), ("mr-b", 20)]));
        let shared = Resolver::new(&store, poll()).with_budget(ChildBudget::Shared);
        let err = shared
            .assert_all(&chain(), &LabelEquals::new(LABEL, "true"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { ref what, .. } if what.contains("mr-b")));
    }

    #[tokio::test(start_paused = true)]
    async fn absent_child_is_awaited_not_fatal() {
        let refs = json!([{"name": "mr-late", "apiVersion": NOP_API, "kind": "NopResource"}]);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut store = MockObjectStore::new();
        store.expect_get().returning(move |r| match r.name.as_str() {
            "claim" => UntypedObject::new(claim()),
            "xr-1" => UntypedObject::new(composite(refs.clone())),
            _ if c.fetch_add(1, Ordering::SeqCst) < 3 => Err(Error::not_found(r)),
            name => UntypedObject::new(managed(name, true)),
        });

        let resolver = Resolver::new(&store, poll());
        resolver
            .assert_all(&chain(), &LabelEquals::new(LABEL, "true"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn reference_missing_kind_is_field_not_found() {
        let refs = json!([{"name": "mr-a", "apiVersion": NOP_API}]);
        let (store, _) = store_with(refs, HashMap::new());
        let resolver = Resolver::new(&store, poll());

        match resolver.resolve(&chain()).await {
            Err(Error::FieldNotFound { path, resource }) => {
                assert_eq!(path, "spec.resourceRefs[0].kind");
                assert!(resource.contains("xr-1"));
            }
            other => panic!("expected FieldNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_reference_field_is_type_mismatch() {
        let (store, _) = store_with(json!("not-a-list"), HashMap::new());
        let resolver = Resolver::new(&store, poll());

        assert!(matches!(
            resolver.resolve(&chain()).await,
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn store_failure_on_intermediate_object_is_fatal() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .times(1)
            .returning(|r| Err(Error::store(r, "connection refused")));
        let resolver = Resolver::new(&store, poll());

        assert!(matches!(
            resolver.resolve(&chain()).await,
            Err(Error::Store { .. })
        ));
    }

    #[tokio::test]
    async fn empty_reference_list_is_vacuously_satisfied() {
        let (store, _) = store_with(json!([]), HashMap::new());
        let resolver = Resolver::new(&store, poll());

        let targets = resolver
            .assert_all(&chain(), &LabelEquals::new(LABEL, "true"))
            .await
            .unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn child_budget_parses_from_config_strings() {
        assert_eq!("per-child".parse::<ChildBudget>().unwrap(), ChildBudget::PerChild);
        assert_eq!("Shared".parse::<ChildBudget>().unwrap(), ChildBudget::Shared);
        assert!("sometimes".parse::<ChildBudget>().is_err());
        assert_eq!(ChildBudget::Shared.to_string(), "shared");
    }
}
