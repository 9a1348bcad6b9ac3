//! Composers declaring the children of every goharbor.io kind
//!
//! Component composers (`Core`, `Registry`, ...) build the workload of a
//! single Harbor service. The [`harbor`] composer assembles those
//! components into an installation and [`harbor_cluster`] adds the
//! in-cluster backends on top.

pub mod chartmuseum;
pub mod core;
pub mod exporter;
pub mod harbor;
pub mod harbor_cluster;
pub mod jobservice;
pub mod notary;
pub mod portal;
pub mod registry;
pub mod registryctl;
pub mod robot;
pub mod trivy;

use crate::api::common::{ComponentsTlsSpec, ProxySpec, StorageDriverSpec, ANNOTATION_HARBOR_VERSION};
use crate::error::Result;
use crate::graph::{NodeKey, RunReport};
use crate::images::Component;
use crate::mutation::ANNOTATION_NETWORK_POLICIES;
use crate::reconciler::ResourceManager;
use crate::resources::{env, ResourceBuilder, ANNOTATION_HARBOR};
use crate::status::ComponentStatus;
use crate::version;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{EnvVar, Service};
use kube::Resource;

/// Annotation value turning the default network policies off
pub const NETWORK_POLICIES_DISABLED: &str = "disabled";

/// Mount point of internal TLS material
const INTERNAL_TLS_DIR: &str = "/etc/harbor/ssl";

fn annotation<'a, K: Resource>(owner: &'a K, key: &str) -> Option<&'a str> {
    owner
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Harbor version a component runs, from its version annotation
pub(crate) fn version_of<K: Resource>(owner: &K) -> String {
    annotation(owner, ANNOTATION_HARBOR_VERSION)
        .map(str::to_string)
        .unwrap_or_else(version::default_version)
}

pub(crate) fn network_policies_enabled<K: Resource>(owner: &K) -> bool {
    annotation(owner, ANNOTATION_NETWORK_POLICIES) != Some(NETWORK_POLICIES_DISABLED)
}

/// Harbor installation a component belongs to
pub(crate) fn harbor_instance<K: Resource>(owner: &K) -> String {
    annotation(owner, ANNOTATION_HARBOR)
        .map(str::to_string)
        .or_else(|| owner.meta().name.clone())
        .unwrap_or_default()
}

/// Declare user provided secrets, skipping unset references
pub(crate) fn add_secret_refs(
    manager: &mut ResourceManager,
    refs: &[Option<&str>],
) -> Result<Vec<NodeKey>> {
    refs.iter()
        .flatten()
        .filter(|name| !name.is_empty())
        .map(|name| manager.add_secret_dependency(name))
        .collect()
}

/// Declare the internal TLS secret of a component when it has one
pub(crate) fn add_internal_tls(
    manager: &mut ResourceManager,
    tls: Option<&ComponentsTlsSpec>,
) -> Result<Option<NodeKey>> {
    tls.map(|tls| manager.add_tls_secret(&tls.certificate_ref, &[]))
        .transpose()
}

pub(crate) fn scheme(tls: bool) -> &'static str {
    if tls {
        "https"
    } else {
        "http"
    }
}

/// Environment pointing a component at its internal certificate
pub(crate) fn internal_tls_env(component: Component) -> Vec<EnvVar> {
    let dir = format!("{}/{}", INTERNAL_TLS_DIR, component.name());
    vec![
        env("INTERNAL_TLS_ENABLED", "true"),
        env("INTERNAL_TLS_KEY_PATH", format!("{}/tls.key", dir)),
        env("INTERNAL_TLS_CERT_PATH", format!("{}/tls.crt", dir)),
        env("INTERNAL_TLS_TRUST_CA_PATH", format!("{}/ca.crt", dir)),
    ]
}

pub(crate) fn internal_tls_path(component: Component, file: &str) -> String {
    format!("{}/{}/{}", INTERNAL_TLS_DIR, component.name(), file)
}

pub(crate) fn proxy_env(proxy: Option<&ProxySpec>) -> Vec<EnvVar> {
    let Some(proxy) = proxy else {
        return Vec::new();
    };
    let mut vars = Vec::new();
    if let Some(http) = &proxy.http_proxy {
        vars.push(env("HTTP_PROXY", http.clone()));
    }
    if let Some(https) = &proxy.https_proxy {
        vars.push(env("HTTPS_PROXY", https.clone()));
    }
    if !proxy.no_proxy.is_empty() {
        vars.push(env("NO_PROXY", proxy.no_proxy.join(",")));
    }
    vars
}

/// Secret holding the credentials of an object storage driver
pub(crate) fn storage_credentials(driver: &StorageDriverSpec) -> Option<&str> {
    if let Some(s3) = &driver.s3 {
        return s3.credentials_ref.as_deref();
    }
    if let Some(azure) = &driver.azure {
        return Some(&azure.account_key_ref);
    }
    driver.gcs.as_ref().map(|gcs| gcs.key_ref.as_str())
}

pub(crate) fn to_yaml(value: &serde_json::Value) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}

/// Deployment of a component with the service in front of it
pub(crate) struct Workload {
    pub deployment: Deployment,
    pub service: Service,
    pub parents: Vec<NodeKey>,
    /// Ports the network policy opens
    pub ports: Vec<i32>,
}

/// Declare the service, the deployment and the default network policy
pub(crate) fn add_workload<K: Resource>(
    owner: &K,
    builder: &ResourceBuilder<'_>,
    manager: &mut ResourceManager,
    workload: Workload,
) -> Result<NodeKey> {
    manager.add_service(&workload.service, &[])?;
    let deployment = manager.add_deployment(&workload.deployment, &workload.parents)?;
    if network_policies_enabled(owner) {
        let policy = builder.network_policy(&harbor_instance(owner), &workload.ports);
        manager.add_network_policy(&policy, &[])?;
    }
    Ok(deployment)
}

pub(crate) fn deployment_key(namespace: &str, name: &str) -> NodeKey {
    NodeKey::new("apps/v1", "Deployment", namespace, name)
}

/// Report the replica count once the deployment rolled out
pub(crate) fn workload_status(
    report: &RunReport,
    namespace: &str,
    name: &str,
    replicas: Option<i32>,
    status: &mut ComponentStatus,
) {
    if report.succeeded(&deployment_key(namespace, name)) {
        status.replicas = Some(replicas.unwrap_or(1));
    }
}
