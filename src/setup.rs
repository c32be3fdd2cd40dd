//! Setup steps that seed the cluster before assertions run

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use tracing::info;

use crate::env::EnvConfig;
use crate::feature::{Context, Reporter, Step};
use crate::object::UntypedObject;
use crate::{pki, Error, Result};

/// Name of the TLS secret holding the registry certificate
pub const TLS_SECRET_NAME: &str = "reg-cert";
/// Name of the config map holding the CA bundle
pub const CA_CONFIGMAP_NAME: &str = "reg-ca";
/// Key of the CA certificate inside the config map
pub const CA_CONFIGMAP_KEY: &str = "domain.crt";
/// Context key under which the secret's namespace is recorded
pub const CONTEXT_TLS_SECRET: &str = "tls-secret";

/// Step that creates a CA for a DNS name and stores it in the cluster
#[derive(Clone, Debug)]
pub struct TlsCertificateSecret {
    dns_name: String,
    namespace: String,
}

/// Generate a certificate for `dns_name` and store it.
///
/// The certificate and key go into a `kubernetes.io/tls` secret in
/// `namespace`; the certificate alone goes into a config map in the
/// environment's namespace so clients can trust it.
pub fn tls_certificate_as_secret(
    dns_name: impl Into<String>,
    namespace: impl Into<String>,
) -> TlsCertificateSecret {
    TlsCertificateSecret {
        dns_name: dns_name.into(),
        namespace: namespace.into(),
    }
}

fn to_untyped<T: Serialize>(resource: &T) -> Result<UntypedObject> {
    let value = serde_json::to_value(resource)
        .map_err(|e| Error::config(format!("failed to serialize setup object: {}", e)))?;
    UntypedObject::new(value)
}

impl TlsCertificateSecret {
    fn secret(&self, bundle: &pki::CaBundle) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(TLS_SECRET_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            string_data: Some(BTreeMap::from([
                ("tls.crt".to_string(), bundle.cert_pem.clone()),
                ("tls.key".to_string(), bundle.key_pem.clone()),
            ])),
            ..Default::default()
        }
    }

    fn config_map(&self, bundle: &pki::CaBundle, namespace: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(CA_CONFIGMAP_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                CA_CONFIGMAP_KEY.to_string(),
                bundle.cert_pem.clone(),
            )])),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Step for TlsCertificateSecret {
    async fn run(&self, ctx: Context, reporter: &Reporter, env: &EnvConfig) -> Result<Context> {
        let writer = env.writer()?;
        let bundle = pki::generate(&self.dns_name)?;

        writer
            .apply(&to_untyped(&self.secret(&bundle))?, &env.namespace)
            .await?;
        reporter.log(format!(
            "created secret {}/{} for {}",
            self.namespace, TLS_SECRET_NAME, self.dns_name
        ));

        writer
            .apply(&to_untyped(&self.config_map(&bundle, &env.namespace))?, &env.namespace)
            .await?;
        reporter.log(format!(
            "created config map {}/{}",
            env.namespace, CA_CONFIGMAP_NAME
        ));

        info!(dns_name = %self.dns_name, namespace = %self.namespace, "registry certificate stored");
        Ok(ctx.with_value(CONTEXT_TLS_SECRET, format!("{}/{}", self.namespace, TLS_SECRET_NAME)))
    }
}
