//! Object accessor backed by the Kubernetes API
//!
//! Reads go through `Api<DynamicObject>` so any kind can be fetched without a
//! compiled schema. Each read is a single point get: retrying belongs to the
//! poller, not to this layer.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{self, ApiCapabilities, ApiResource, Scope};
use kube::{Client, Config};
use tokio::sync::RwLock;
use tracing::{debug, trace};

#[cfg(test)]
use mockall::automock;

use crate::object::{ObjectRef, UntypedObject};
use crate::{Error, Result};

/// Read access to the remote object store
///
/// This trait allows mocking the store in tests while using the real
/// Kubernetes client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a fresh copy of the object at `obj_ref`.
    ///
    /// Fails with `InvalidReference` on malformed coordinates, `NotFound` when
    /// the object is absent, and `Store` for any other read failure.
    async fn get(&self, obj_ref: &ObjectRef) -> Result<UntypedObject>;
}

/// Write access used by setup steps
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectWriter: Send + Sync {
    /// Create or update `object` with server-side apply.
    ///
    /// An object without `metadata.namespace` is written to
    /// `default_namespace`, normally the environment's namespace.
    async fn apply(&self, object: &UntypedObject, default_namespace: &str) -> Result<()>;
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::config(format!("failed to read kubeconfig: {}", e)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(Error::from)
}

/// Object store reading from a live cluster
pub struct KubeStore {
    client: Client,
    field_manager: String,
    resources: RwLock<HashMap<String, (ApiResource, ApiCapabilities)>>,
}

impl KubeStore {
    /// Wrap a client. `field_manager` names this engine in server-side apply.
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the API resource for a reference, caching discovery results.
    async fn resource_for(&self, obj_ref: &ObjectRef) -> Result<(ApiResource, ApiCapabilities)> {
        let gvk = obj_ref.group_version_kind()?;
        let key = format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind);

        if let Some(found) = self.resources.read().await.get(&key) {
            return Ok(found.clone());
        }

        let resolved = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| Error::store(obj_ref, format!("discovery failed: {}", e)))?;
        debug!(
            api_version = %obj_ref.api_version,
            kind = %obj_ref.kind,
            plural = %resolved.0.plural,
            "discovered API resource"
        );
        self.resources.write().await.insert(key, resolved.clone());
        Ok(resolved)
    }

    fn api_for(&self, ar: &ApiResource, caps: &ApiCapabilities, namespace: &str) -> Api<DynamicObject> {
        match caps.scope {
            Scope::Cluster => Api::all_with(self.client.clone(), ar),
            Scope::Namespaced => Api::namespaced_with(self.client.clone(), namespace, ar),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, obj_ref: &ObjectRef) -> Result<UntypedObject> {
        obj_ref.validate()?;
        let (ar, caps) = self.resource_for(obj_ref).await?;
        let api = self.api_for(&ar, &caps, &obj_ref.namespace);

        trace!(resource = %obj_ref, "reading object");
        let object = api.get(&obj_ref.name).await.map_err(|e| match e {
            kube::Error::Api(ref resp) if resp.code == 404 => Error::not_found(obj_ref),
            other => Error::store(obj_ref, other.to_string()),
        })?;

        let value = serde_json::to_value(&object)
            .map_err(|e| Error::store(obj_ref, format!("failed to serialize object: {}", e)))?;
        UntypedObject::new(value)
    }
}

#[async_trait]
impl ObjectWriter for KubeStore {
    async fn apply(&self, object: &UntypedObject, default_namespace: &str) -> Result<()> {
        let obj_ref = object.object_ref(default_namespace)?;
        let (ar, caps) = self.resource_for(&obj_ref).await?;
        let api = self.api_for(&ar, &caps, &obj_ref.namespace);

        let params = PatchParams::apply(&self.field_manager).force();
        api.patch(&obj_ref.name, &params, &Patch::Apply(object.as_value()))
            .await
            .map_err(|e| Error::store(&obj_ref, format!("apply failed: {}", e)))?;
        debug!(resource = %obj_ref, "applied object");
        Ok(())
    }
}
