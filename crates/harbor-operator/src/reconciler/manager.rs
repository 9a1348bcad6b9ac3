//! Declares the children of one owner and turns them into graph nodes
//!
//! Every `add_*` call registers a node whose processor mutates, stamps,
//! applies and then waits on the child. External dependencies are only
//! observed. Every parent feeds the fingerprint of its children, so a
//! changed secret or certificate rewrites them and rolls their pods.

use crate::checksum::DependencyChecksum;
use crate::cluster_client::ClusterClient;
use crate::error::{OperatorError, Result};
use crate::graph::{NodeKey, Processor, ResourceGraph, RunReport};
use crate::mutation::{
    common_pipeline, dependency_annotations, immutable, pod_template_propagation,
    DependencyState, MutationContext, MutationPipeline, OwnerInfo,
};
use crate::readiness::ReadinessCheck;
use base64::Engine;
use dashmap::DashMap;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use kube::core::{ApiResource, DynamicObject};
use kube::Resource;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::api::Owner;
use crate::certmanager::{Certificate, Issuer};

/// Serialize a typed object into its dynamic form
pub fn to_dynamic<K>(obj: &K) -> Result<(ApiResource, DynamicObject)>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let ar = ApiResource::erase::<K>(&());
    let value = serde_json::to_value(obj)?;
    let mut dynamic: DynamicObject = serde_json::from_value(value)?;
    dynamic.types = Some(kube::api::TypeMeta {
        api_version: ar.api_version.clone(),
        kind: ar.kind.clone(),
    });
    Ok((ar, dynamic))
}

fn node_key(ar: &ApiResource, namespace: &str, name: &str) -> NodeKey {
    NodeKey::new(ar.api_version.clone(), ar.kind.clone(), namespace, name)
}

/// A child the operator writes
struct ManagedNode {
    key: NodeKey,
    ar: ApiResource,
    desired: DynamicObject,
    parents: Vec<NodeKey>,
    pipeline: MutationPipeline,
    check: ReadinessCheck,
    owner: Arc<OwnerInfo>,
    client: Arc<dyn ClusterClient>,
    applied: Arc<DashMap<NodeKey, DependencyState>>,
}

impl ManagedNode {
    fn dependencies(&self) -> Vec<DependencyState> {
        self.parents
            .iter()
            .filter_map(|parent| self.applied.get(parent).map(|state| state.clone()))
            .collect()
    }

    async fn process(&self) -> Result<()> {
        let dependencies = self.dependencies();
        let mut desired = self.desired.clone();

        let ctx = MutationContext {
            owner: &self.owner,
            dependencies: &dependencies,
        };
        self.pipeline.apply(&mut desired, &ctx)?;

        let checksum = DependencyChecksum::new(&self.owner, &dependencies);
        checksum.stamp(&mut desired)?;

        let remote = self
            .client
            .get(&self.ar, &self.key.namespace, &self.key.name)
            .await?;

        let current = if checksum.changed(remote.as_ref(), &desired) {
            debug!(resource = %self.key, "Resource out of date, applying");
            self.client.apply(&self.ar, &desired).await?
        } else {
            trace!(resource = %self.key, "Resource up to date");
            match remote {
                Some(remote) => remote,
                None => desired,
            }
        };

        if !self.check.is_ready(&current)? {
            return Err(OperatorError::not_ready(format!("{} is not ready", self.key)));
        }

        self.applied
            .insert(self.key.clone(), DependencyState::from_object(&current));
        Ok(())
    }
}

/// An object owned by someone else that children wait on
struct ExternalNode {
    key: NodeKey,
    ar: ApiResource,
    check: ReadinessCheck,
    client: Arc<dyn ClusterClient>,
    applied: Arc<DashMap<NodeKey, DependencyState>>,
}

impl ExternalNode {
    async fn process(&self) -> Result<()> {
        let remote = self
            .client
            .get(&self.ar, &self.key.namespace, &self.key.name)
            .await?
            .ok_or_else(|| OperatorError::not_ready(format!("{} not found", self.key)))?;

        if !self.check.is_ready(&remote)? {
            return Err(OperatorError::not_ready(format!("{} is not ready", self.key)));
        }

        self.applied
            .insert(self.key.clone(), DependencyState::from_object(&remote));
        Ok(())
    }
}

/// An object of a previous pass that is no longer declared
struct DeleteNode {
    key: NodeKey,
    ar: ApiResource,
    client: Arc<dyn ClusterClient>,
}

impl DeleteNode {
    async fn process(&self) -> Result<()> {
        debug!(resource = %self.key, "Deleting resource no longer declared");
        self.client
            .delete(&self.ar, &self.key.namespace, &self.key.name)
            .await
    }
}

macro_rules! processor {
    ($node:expr) => {{
        let node = Arc::new($node);
        let processor: Processor = Arc::new(move || {
            let node = node.clone();
            async move { node.process().await.map_err(Arc::new) }.boxed()
        });
        processor
    }};
}

/// Collects the children of one owner for a single reconcile pass
pub struct ResourceManager {
    client: Arc<dyn ClusterClient>,
    owner: Arc<OwnerInfo>,
    pipeline: MutationPipeline,
    graph: ResourceGraph,
    applied: Arc<DashMap<NodeKey, DependencyState>>,
}

impl ResourceManager {
    pub fn new(client: Arc<dyn ClusterClient>, owner: OwnerInfo, harbor_class: &str) -> Self {
        Self {
            client,
            owner: Arc::new(owner),
            pipeline: common_pipeline(harbor_class),
            graph: ResourceGraph::new(),
            applied: Arc::new(DashMap::new()),
        }
    }

    pub fn owner(&self) -> &OwnerInfo {
        &self.owner
    }

    pub fn namespace(&self) -> &str {
        &self.owner.namespace
    }

    pub fn client(&self) -> Arc<dyn ClusterClient> {
        self.client.clone()
    }

    /// Keys of every declared node
    pub fn declared(&self) -> Vec<&NodeKey> {
        self.graph.get_all_resources()
    }

    /// Declared parents of a node
    pub fn parents(&self, key: &NodeKey) -> &[NodeKey] {
        self.graph.parents(key)
    }

    pub fn is_declared(&self, key: &NodeKey) -> bool {
        self.graph.contains(key)
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Register a child with extra mutation steps and an explicit check
    pub fn add_unstructured(
        &mut self,
        ar: ApiResource,
        mut desired: DynamicObject,
        parents: &[NodeKey],
        extra: Option<MutationPipeline>,
        check: ReadinessCheck,
    ) -> Result<NodeKey> {
        let name = desired.metadata.name.clone().ok_or_else(|| {
            OperatorError::Internal(format!("{} declared without a name", ar.kind))
        })?;
        let namespace = desired
            .metadata
            .namespace
            .get_or_insert_with(|| self.owner.namespace.clone())
            .clone();
        let key = node_key(&ar, &namespace, &name);

        let mut pipeline = self.pipeline.clone();
        if let Some(extra) = extra {
            pipeline = pipeline.merge(extra);
        }

        let node = ManagedNode {
            key: key.clone(),
            ar,
            desired,
            parents: parents.to_vec(),
            pipeline,
            check,
            owner: self.owner.clone(),
            client: self.client.clone(),
            applied: self.applied.clone(),
        };
        self.graph.add_resource(key.clone(), parents, processor!(node))?;
        Ok(key)
    }

    /// Register a typed child with the default check of its kind
    pub fn add_resource<K>(&mut self, obj: &K, parents: &[NodeKey]) -> Result<NodeKey>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let (ar, desired) = to_dynamic(obj)?;
        let check = ReadinessCheck::for_kind(&ar.api_version, &ar.kind);
        self.add_unstructured(ar, desired, parents, None, check)
    }

    pub fn add_config_map(&mut self, obj: &ConfigMap, parents: &[NodeKey]) -> Result<NodeKey> {
        self.add_resource(obj, parents)
    }

    pub fn add_secret(&mut self, obj: &Secret, parents: &[NodeKey]) -> Result<NodeKey> {
        self.add_resource(obj, parents)
    }

    /// Secret written once and never updated, for generated credentials
    pub fn add_immutable_secret(&mut self, obj: &Secret, parents: &[NodeKey]) -> Result<NodeKey> {
        let (ar, desired) = to_dynamic(obj)?;
        let extra = MutationPipeline::new().append(immutable());
        self.add_unstructured(ar, desired, parents, Some(extra), ReadinessCheck::Always)
    }

    pub fn add_service(&mut self, obj: &Service, parents: &[NodeKey]) -> Result<NodeKey> {
        self.add_resource(obj, parents)
    }

    /// Deployment whose pods restart when a parent changes
    pub fn add_deployment(&mut self, obj: &Deployment, parents: &[NodeKey]) -> Result<NodeKey> {
        let (ar, desired) = to_dynamic(obj)?;
        let extra = MutationPipeline::new()
            .append(dependency_annotations())
            .append(pod_template_propagation());
        self.add_unstructured(ar, desired, parents, Some(extra), ReadinessCheck::Deployment)
    }

    pub fn add_ingress(&mut self, obj: &Ingress, parents: &[NodeKey]) -> Result<NodeKey> {
        self.add_resource(obj, parents)
    }

    pub fn add_network_policy(
        &mut self,
        obj: &NetworkPolicy,
        parents: &[NodeKey],
    ) -> Result<NodeKey> {
        self.add_resource(obj, parents)
    }

    pub fn add_certificate(&mut self, obj: &Certificate, parents: &[NodeKey]) -> Result<NodeKey> {
        self.add_resource(obj, parents)
    }

    pub fn add_issuer(&mut self, obj: &Issuer, parents: &[NodeKey]) -> Result<NodeKey> {
        self.add_resource(obj, parents)
    }

    /// goharbor.io child, ready once it converged on its generation
    pub fn add_component<K: Owner>(&mut self, obj: &K, parents: &[NodeKey]) -> Result<NodeKey> {
        let (ar, desired) = to_dynamic(obj)?;
        self.add_unstructured(ar, desired, parents, None, ReadinessCheck::Component)
    }

    /// Observe an object the operator does not write.
    ///
    /// Declaring the same external twice returns the existing key.
    pub fn add_external(
        &mut self,
        ar: ApiResource,
        name: &str,
        check: ReadinessCheck,
        parents: &[NodeKey],
    ) -> Result<NodeKey> {
        let key = node_key(&ar, &self.owner.namespace, name);
        if self.graph.contains(&key) {
            return Ok(key);
        }
        let node = ExternalNode {
            key: key.clone(),
            ar,
            check,
            client: self.client.clone(),
            applied: self.applied.clone(),
        };
        self.graph.add_resource(key.clone(), parents, processor!(node))?;
        Ok(key)
    }

    /// TLS secret filled by cert-manager
    pub fn add_tls_secret(&mut self, name: &str, parents: &[NodeKey]) -> Result<NodeKey> {
        self.add_external(
            ApiResource::erase::<Secret>(&()),
            name,
            ReadinessCheck::TlsSecret,
            parents,
        )
    }

    /// Secret provided by the user
    pub fn add_secret_dependency(&mut self, name: &str) -> Result<NodeKey> {
        self.add_external(
            ApiResource::erase::<Secret>(&()),
            name,
            ReadinessCheck::Always,
            &[],
        )
    }

    /// Service endpoints that must serve the named ports
    pub fn add_endpoints_dependency(&mut self, name: &str, ports: &[&str]) -> Result<NodeKey> {
        self.add_external(
            ApiResource::erase::<Endpoints>(&()),
            name,
            ReadinessCheck::Endpoints {
                ports: ports.iter().map(|p| p.to_string()).collect(),
            },
            &[],
        )
    }

    /// Remove an object left over from a previous pass
    pub fn add_delete(&mut self, ar: ApiResource, name: &str) -> Result<NodeKey> {
        let key = node_key(&ar, &self.owner.namespace, name);
        let node = DeleteNode {
            key: key.clone(),
            ar,
            client: self.client.clone(),
        };
        self.graph.add_resource(key.clone(), &[], processor!(node))?;
        Ok(key)
    }

    /// Value of `key` in an existing secret, `None` when either is missing
    pub async fn existing_secret_value(&self, name: &str, key: &str) -> Result<Option<String>> {
        let ar = ApiResource::erase::<Secret>(&());
        let Some(secret) = self.client.get(&ar, &self.owner.namespace, name).await? else {
            return Ok(None);
        };
        let Some(encoded) = secret
            .data
            .get("data")
            .and_then(|data| data.get(key))
            .and_then(|value| value.as_str())
        else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| OperatorError::Internal(format!("secret {} is not base64: {}", name, e)))?;
        String::from_utf8(decoded)
            .map(Some)
            .map_err(|e| OperatorError::Internal(format!("secret {} is not UTF-8: {}", name, e)))
    }

    /// Keep the value already stored in a generated secret, or produce a new one
    pub async fn secret_value_or(
        &self,
        name: &str,
        key: &str,
        generate: impl FnOnce() -> Result<String>,
    ) -> Result<String> {
        match self.existing_secret_value(name, key).await? {
            Some(value) => Ok(value),
            None => generate(),
        }
    }

    /// Execute every declared node
    pub async fn run(&self, cancel: &CancellationToken) -> RunReport {
        self.graph.run_with_report(cancel).await
    }
}
