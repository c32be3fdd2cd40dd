//! Story: the registry certificate is stored where the registry and its
//! clients expect it

use std::time::Duration;

use converge::feature::{AllOf, Feature};
use converge::object::ObjectRef;
use converge::setup::{tls_certificate_as_secret, CA_CONFIGMAP_NAME, TLS_SECRET_NAME};
use converge::steps::resource_exists_within;

use super::live_environment;

const REGISTRY_NAMESPACE: &str = "xfn-registry";

#[tokio::test]
#[ignore = "requires a cluster with the xfn-registry namespace"]
async fn story_certificate_is_readable_after_setup() {
    let env = live_environment().await;
    let namespace = env.config().namespace.clone();

    let feature = Feature::new("RegistryCertificate")
        .with_setup(
            "CreateCertificate",
            tls_certificate_as_secret(
                "private-docker-registry.xfn-registry.svc.cluster.local",
                REGISTRY_NAMESPACE,
            ),
        )
        .assess(
            "CertificateStored",
            AllOf::new()
                .then(
                    "secret-exists",
                    resource_exists_within(
                        Duration::from_secs(30),
                        ObjectRef::new(TLS_SECRET_NAME, REGISTRY_NAMESPACE, "v1", "Secret"),
                    ),
                )
                .then(
                    "config-map-exists",
                    resource_exists_within(
                        Duration::from_secs(30),
                        ObjectRef::new(CA_CONFIGMAP_NAME, namespace, "v1", "ConfigMap"),
                    ),
                ),
        );

    env.test(feature).await.into_result().unwrap();
}
