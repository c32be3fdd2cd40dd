//! Story: a composition function labels everything it composes
//!
//! Applies the `fn-labelizer` claim from `tests/manifests/xfn/labelizer`.
//! Its composition, running the labelizer function, must be installed.

use std::path::PathBuf;
use std::time::Duration;

use converge::condition::{HasStatusCondition, LabelEquals};
use converge::feature::{AllOf, Feature};
use converge::object::ObjectRef;
use converge::resolve::ReferenceChain;
use converge::steps::{
    apply_resources, chain_satisfies_within, resources_created_within,
    resources_have_condition_within,
};

use super::live_environment;

const PROCESSED: &str = "labelizer.xfn.crossplane.io/processed";

fn manifests() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/manifests/xfn/labelizer")
}

fn claim(namespace: &str) -> ObjectRef {
    ObjectRef::new("fn-labelizer", namespace, "nop.example.org/v1alpha1", "NopResource")
}

#[tokio::test]
#[ignore = "requires a cluster with Crossplane and the labelizer function"]
async fn story_labelizer_marks_composed_resources() {
    let env = live_environment().await;
    let namespace = env.config().namespace.clone();

    let chain = ReferenceChain::new(claim(&namespace))
        .follow_one("spec.resourceRef".parse().unwrap())
        .follow_many("spec.resourceRefs".parse().unwrap());

    let feature = Feature::new("XfnRunnerWriteToMetadata")
        .with_label("area", "xfn")
        .with_setup("ApplyClaim", apply_resources(manifests(), "claim.yaml"))
        .assess(
            "ClaimIsAvailable",
            AllOf::new()
                .then(
                    "claim-created",
                    resources_created_within(Duration::from_secs(30), manifests(), "claim.yaml"),
                )
                .then(
                    "claim-available",
                    resources_have_condition_within(
                        Duration::from_secs(300),
                        manifests(),
                        "claim.yaml",
                        HasStatusCondition::available(),
                    ),
                ),
        )
        .assess(
            "ManagedResourcesProcessed",
            chain_satisfies_within(
                chain,
                LabelEquals::new(PROCESSED, "true"),
                Duration::from_secs(300),
            ),
        );

    env.test(feature).await.into_result().unwrap();
}
