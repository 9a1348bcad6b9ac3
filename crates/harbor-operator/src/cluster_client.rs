//! Cluster client
//!
//! Every read and write the reconciler performs goes through
//! [`ClusterClient`]. Objects travel as [`DynamicObject`] addressed by an
//! [`ApiResource`] so built-in kinds, goharbor.io kinds and third-party
//! backends share a single code path.
//!
//! [`KubeCluster`] talks to the API server with server-side apply.
//! [`MemoryCluster`] keeps objects in memory for tests and counts writes.

use crate::config::OPERATOR_NAME;
use crate::error::{OperatorError, Result, REASON_DEPENDENCY_STATUS};
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::Client;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Access to the orchestrator
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, ar: &ApiResource, namespace: &str, name: &str)
        -> Result<Option<DynamicObject>>;

    /// List objects of a kind in a namespace; a kind that is not installed lists empty
    async fn list(&self, ar: &ApiResource, namespace: &str) -> Result<Vec<DynamicObject>>;

    /// Server-side apply the object with the operator's field manager
    async fn apply(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()>;

    /// Merge the given value into the status subresource
    async fn patch_status(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<DynamicObject>;
}

fn object_name(obj: &DynamicObject) -> Result<(&str, &str)> {
    let name = obj
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| OperatorError::Internal("object is missing metadata.name".into()))?;
    let namespace = obj.metadata.namespace.as_deref().unwrap_or("default");
    Ok((name, namespace))
}

/// Client backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, ar)
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let mut obj = self.api(ar, namespace).get_opt(name).await?;
        if let Some(obj) = obj.as_mut() {
            obj.types.get_or_insert_with(|| type_meta(ar));
        }
        Ok(obj)
    }

    async fn list(&self, ar: &ApiResource, namespace: &str) -> Result<Vec<DynamicObject>> {
        match self.api(ar, namespace).list(&ListParams::default()).await {
            Ok(list) => Ok(list
                .items
                .into_iter()
                .map(|mut obj| {
                    obj.types.get_or_insert_with(|| type_meta(ar));
                    obj
                })
                .collect()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(kind = %ar.kind, "Kind not served by the cluster, nothing to list");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let (name, namespace) = object_name(obj)?;
        let mut obj = obj.clone();
        obj.types = Some(type_meta(ar));
        obj.metadata.managed_fields = None;
        obj.metadata.resource_version = None;

        debug!(kind = %ar.kind, name = %name, namespace = %namespace, "Applying resource");

        let params = PatchParams::apply(OPERATOR_NAME).force();
        let applied = self
            .api(ar, namespace)
            .patch(name, &params, &Patch::Apply(&obj))
            .await?;
        Ok(applied)
    }

    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        debug!(kind = %ar.kind, name = %name, namespace = %namespace, "Deleting resource");
        match self
            .api(ar, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_status(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<DynamicObject> {
        let patch = json!({ "status": status });
        match self
            .api(ar, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(obj) => Ok(obj),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                warn!(kind = %ar.kind, name = %name, "Status conflict, will re-read");
                Err(OperatorError::retry_later(
                    REASON_DEPENDENCY_STATUS,
                    format!("status of {} is stale: {}", name, resp.message),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn type_meta(ar: &ApiResource) -> kube::api::TypeMeta {
    kube::api::TypeMeta {
        api_version: ar.api_version.clone(),
        kind: ar.kind.clone(),
    }
}

type StoreKey = (String, String, String);

fn store_key(ar: &ApiResource, namespace: &str, name: &str) -> StoreKey {
    (
        format!("{}/{}", ar.group, ar.kind),
        namespace.to_string(),
        name.to_string(),
    )
}

/// Hook run on every applied object, used to play the part of other controllers
pub type ApplyHook = Box<dyn Fn(&mut DynamicObject) + Send + Sync>;

/// In-memory cluster.
///
/// Assigns uids, resource versions and generations the way the API server
/// does: the generation moves when anything outside `status` changes and
/// the resource version moves on every write. Applying keeps the stored
/// status, as the status subresource would.
#[derive(Default)]
pub struct MemoryCluster {
    objects: Mutex<BTreeMap<StoreKey, DynamicObject>>,
    next_version: AtomicU64,
    applies: AtomicUsize,
    deletes: AtomicUsize,
    status_writes: AtomicUsize,
    hooks: Vec<ApplyHook>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` on every object after it is applied
    pub fn with_hook(mut self, hook: ApplyHook) -> Self {
        self.hooks.push(hook);
        self
    }

    fn bump(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Store an object as if another actor had created it
    pub fn insert(&self, ar: &ApiResource, mut obj: DynamicObject) -> DynamicObject {
        obj.types = Some(type_meta(ar));
        let name = obj.metadata.name.clone().unwrap_or_default();
        let namespace = obj
            .metadata
            .namespace
            .get_or_insert_with(|| "default".to_string())
            .clone();
        obj.metadata.uid.get_or_insert_with(|| format!("uid-{}-{}", ar.kind.to_lowercase(), name));
        obj.metadata.generation.get_or_insert(1);
        obj.metadata.resource_version = Some(self.bump());
        self.objects
            .lock()
            .insert(store_key(ar, &namespace, &name), obj.clone());
        obj
    }

    /// Snapshot of a stored object
    pub fn object(&self, ar: &ApiResource, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .get(&store_key(ar, namespace, name))
            .cloned()
    }

    /// Every stored object of a kind in a namespace
    pub fn objects(&self, ar: &ApiResource, namespace: &str) -> Vec<DynamicObject> {
        let kind = format!("{}/{}", ar.group, ar.kind);
        self.objects
            .lock()
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Replace the spec-level content of a stored object, bumping its generation
    pub fn update<F: FnOnce(&mut DynamicObject)>(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        f: F,
    ) -> Option<DynamicObject> {
        let version = self.bump();
        let mut objects = self.objects.lock();
        let obj = objects.get_mut(&store_key(ar, namespace, name))?;
        f(obj);
        obj.metadata.generation = Some(obj.metadata.generation.unwrap_or(0) + 1);
        obj.metadata.resource_version = Some(version);
        Some(obj.clone())
    }

    /// Number of apply calls
    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    /// Number of delete calls
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Number of status writes
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Total writes of any kind
    pub fn writes(&self) -> usize {
        self.applies() + self.deletes() + self.status_writes()
    }
}

fn without_status(obj: &DynamicObject) -> Value {
    let mut data = obj.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    json!({
        "labels": obj.metadata.labels,
        "annotations": obj.metadata.annotations,
        "ownerReferences": obj.metadata.owner_references,
        "data": data,
    })
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.object(ar, namespace, name))
    }

    async fn list(&self, ar: &ApiResource, namespace: &str) -> Result<Vec<DynamicObject>> {
        Ok(self.objects(ar, namespace))
    }

    async fn apply(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let (name, namespace) = object_name(obj)?;
        self.applies.fetch_add(1, Ordering::SeqCst);

        let key = store_key(ar, namespace, name);
        let version = self.bump();
        let mut incoming = obj.clone();
        incoming.types = Some(type_meta(ar));
        incoming.metadata.namespace = Some(namespace.to_string());
        incoming.metadata.resource_version = Some(version);

        let mut objects = self.objects.lock();
        match objects.get(&key) {
            Some(existing) => {
                incoming.metadata.uid = existing.metadata.uid.clone();
                incoming.metadata.creation_timestamp =
                    existing.metadata.creation_timestamp.clone();
                let generation = existing.metadata.generation.unwrap_or(1);
                incoming.metadata.generation = Some(
                    if without_status(existing) == without_status(&incoming) {
                        generation
                    } else {
                        generation + 1
                    },
                );
                match (existing.data.get("status"), incoming.data.as_object_mut()) {
                    (Some(status), Some(map)) => {
                        map.insert("status".to_string(), status.clone());
                    }
                    (None, Some(map)) => {
                        map.remove("status");
                    }
                    _ => {}
                }
            }
            None => {
                let version = incoming.metadata.resource_version.clone().unwrap_or_default();
                incoming.metadata.uid = Some(format!(
                    "uid-{}-{}-{}",
                    ar.kind.to_lowercase(),
                    name,
                    version
                ));
                incoming.metadata.generation = Some(1);
                if let Some(map) = incoming.data.as_object_mut() {
                    map.remove("status");
                }
            }
        }

        for hook in &self.hooks {
            hook(&mut incoming);
        }

        objects.insert(key, incoming.clone());
        Ok(incoming)
    }

    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().remove(&store_key(ar, namespace, name));
        Ok(())
    }

    async fn patch_status(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<DynamicObject> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        let version = self.bump();
        let mut objects = self.objects.lock();
        let obj = objects
            .get_mut(&store_key(ar, namespace, name))
            .ok_or_else(|| OperatorError::NotFound {
                kind: ar.kind.clone(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;
        if let Some(map) = obj.data.as_object_mut() {
            map.insert("status".to_string(), status.clone());
        }
        obj.metadata.resource_version = Some(version);
        Ok(obj.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn config_map_ar() -> ApiResource {
        ApiResource::erase::<ConfigMap>(&())
    }

    fn config_map(value: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "ns"},
            "data": {"key": value}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_assigns_identity() {
        let cluster = MemoryCluster::new();
        let ar = config_map_ar();

        let created = cluster.apply(&ar, &config_map("a")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.generation, Some(1));

        let same = cluster.apply(&ar, &config_map("a")).await.unwrap();
        assert_eq!(same.metadata.uid, created.metadata.uid);
        assert_eq!(same.metadata.generation, Some(1));
        assert_ne!(same.metadata.resource_version, created.metadata.resource_version);

        let changed = cluster.apply(&ar, &config_map("b")).await.unwrap();
        assert_eq!(changed.metadata.generation, Some(2));
        assert_eq!(cluster.applies(), 3);
    }

    #[tokio::test]
    async fn test_apply_keeps_status() {
        let cluster = MemoryCluster::new();
        let ar = config_map_ar();
        cluster.apply(&ar, &config_map("a")).await.unwrap();
        cluster
            .patch_status(&ar, "ns", "settings", &json!({"observedGeneration": 1}))
            .await
            .unwrap();

        let applied = cluster.apply(&ar, &config_map("a")).await.unwrap();
        assert_eq!(applied.data["status"]["observedGeneration"], 1);
        assert_eq!(cluster.status_writes(), 1);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let cluster = MemoryCluster::new();
        let ar = config_map_ar();
        cluster.apply(&ar, &config_map("a")).await.unwrap();

        assert_eq!(cluster.list(&ar, "ns").await.unwrap().len(), 1);
        assert!(cluster.list(&ar, "other").await.unwrap().is_empty());

        cluster.delete(&ar, "ns", "settings").await.unwrap();
        assert!(cluster.get(&ar, "ns", "settings").await.unwrap().is_none());
        // deleting again is fine
        cluster.delete(&ar, "ns", "settings").await.unwrap();
        assert_eq!(cluster.deletes(), 2);
    }

    #[tokio::test]
    async fn test_hooks_run_on_apply() {
        let cluster = MemoryCluster::new().with_hook(Box::new(|obj| {
            if let Some(map) = obj.data.as_object_mut() {
                map.insert("status".into(), json!({"seen": true}));
            }
        }));
        let applied = cluster.apply(&config_map_ar(), &config_map("a")).await.unwrap();
        assert_eq!(applied.data["status"]["seen"], true);
    }

    #[tokio::test]
    async fn test_patch_status_missing_object() {
        let cluster = MemoryCluster::new();
        let err = cluster
            .patch_status(&config_map_ar(), "ns", "missing", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::NotFound { .. }));
    }
}
