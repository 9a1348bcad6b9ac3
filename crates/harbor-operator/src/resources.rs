//! Kubernetes Resource Builders
//!
//! Manifests shared by every Harbor component: the deployment running it,
//! its service, configuration and network policy. Ownership, labels of the
//! operator and dependency annotations are added later by the mutation
//! pipeline, so the builders only describe the workload itself.

use crate::api::common::ComponentSpec;
use crate::config::OPERATOR_NAME;
use crate::error::{OperatorError, Result};
use crate::images::Component;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, Container, ContainerPort,
    EnvFromSource, EnvVar, EnvVarSource, HTTPGetAction, KeyToPath,
    PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    SeccompProfile, Secret, SecretKeySelector, SecretVolumeSource, SecurityContext, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, NetworkPolicy, NetworkPolicyIngressRule,
    NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// UID Harbor images run as
const HARBOR_UID: i64 = 10000;

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_VERSION: &str = "app.kubernetes.io/version";
/// Harbor a network policy protects
pub const ANNOTATION_HARBOR: &str = "goharbor.io/harbor";

pub const SECRET_TYPE_OPAQUE: &str = "Opaque";

/// Builder for the resources of one component owner
pub struct ResourceBuilder<'a> {
    name: String,
    namespace: String,
    component: Component,
    spec: &'a ComponentSpec,
    version: String,
}

impl<'a> ResourceBuilder<'a> {
    /// Create a new resource builder for an owner
    pub fn new<K: Resource>(
        owner: &K,
        component: Component,
        spec: &'a ComponentSpec,
        version: impl Into<String>,
    ) -> Result<Self> {
        let name = owner.meta().name.clone().ok_or_else(|| {
            OperatorError::InvalidConfig("owner name is required".to_string())
        })?;
        let namespace = owner.namespace().unwrap_or_else(|| "default".to_string());

        Ok(Self {
            name,
            namespace,
            component,
            spec,
            version: version.into(),
        })
    }

    /// Name of the owner, which is also the name of its main resources
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `<owner>-<suffix>` for secondary resources
    pub fn child_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.name, suffix)
    }

    /// Labels placed on every resource
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels();
        labels.insert(LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string());
        labels.insert(LABEL_PART_OF.to_string(), "harbor".to_string());
        labels.insert(LABEL_VERSION.to_string(), self.version.clone());
        labels
    }

    /// Labels selecting the component pods
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_NAME.to_string(), self.component.name().to_string()),
            (LABEL_INSTANCE.to_string(), self.name.clone()),
        ])
    }

    fn metadata(&self, name: String) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }

    /// Main container with secure defaults and the component port
    pub fn container(&self, image: String) -> Container {
        let port = self.component.port();
        Container {
            name: self.component.name().to_string(),
            image: Some(image),
            image_pull_policy: self.spec.image_pull_policy.clone(),
            ports: Some(vec![ContainerPort {
                name: Some("http".to_string()),
                container_port: port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            resources: self.spec.resources.clone(),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(false),
                run_as_non_root: Some(true),
                capabilities: Some(Capabilities {
                    drop: Some(vec!["ALL".to_string()]),
                    ..Default::default()
                }),
                seccomp_profile: Some(SeccompProfile {
                    type_: "RuntimeDefault".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Deployment running the given containers
    pub fn deployment(&self, containers: Vec<Container>, volumes: Vec<Volume>) -> Deployment {
        let selector_labels = self.selector_labels();
        let mut pod_labels = self.labels();
        pod_labels.extend(selector_labels.clone());

        let annotations = if self.spec.template_annotations.is_empty() {
            None
        } else {
            Some(self.spec.template_annotations.clone())
        };

        let pod_spec = PodSpec {
            containers,
            volumes: if volumes.is_empty() {
                None
            } else {
                Some(volumes)
            },
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                run_as_user: Some(HARBOR_UID),
                run_as_group: Some(HARBOR_UID),
                fs_group: Some(HARBOR_UID),
                seccomp_profile: Some(SeccompProfile {
                    type_: "RuntimeDefault".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            node_selector: if self.spec.node_selector.is_empty() {
                None
            } else {
                Some(self.spec.node_selector.clone())
            },
            tolerations: if self.spec.tolerations.is_empty() {
                None
            } else {
                Some(self.spec.tolerations.clone())
            },
            service_account_name: self.spec.service_account_name.clone(),
            image_pull_secrets: self.spec.pull_secrets(),
            automount_service_account_token: Some(false),
            ..Default::default()
        };

        Deployment {
            metadata: self.metadata(self.name.clone()),
            spec: Some(DeploymentSpec {
                replicas: Some(self.spec.replicas.unwrap_or(1)),
                selector: LabelSelector {
                    match_labels: Some(selector_labels),
                    ..Default::default()
                },
                strategy: Some(DeploymentStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    ..Default::default()
                }),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        annotations,
                        ..Default::default()
                    }),
                    spec: Some(pod_spec),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// ClusterIP service named after the owner
    pub fn service(&self, ports: Vec<ServicePort>) -> Service {
        Service {
            metadata: self.metadata(self.name.clone()),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(self.selector_labels()),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Service exposing only the component port
    pub fn default_service(&self, tls: bool) -> Service {
        let (name, port) = if tls { ("https", 443) } else { ("http", 80) };
        self.service(vec![service_port(name, port, self.component.port())])
    }

    pub fn config_map(&self, name: String, data: BTreeMap<String, String>) -> ConfigMap {
        ConfigMap {
            metadata: self.metadata(name),
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn secret(&self, name: String, data: BTreeMap<String, String>) -> Secret {
        typed_secret(self.metadata(name), SECRET_TYPE_OPAQUE, data)
    }

    /// Allow ingress to the component pods only from pods of the same Harbor
    pub fn network_policy(&self, harbor_instance: &str, ports: &[i32]) -> NetworkPolicy {
        let mut metadata = self.metadata(self.name.clone());
        metadata.annotations = Some(BTreeMap::from([(
            ANNOTATION_HARBOR.to_string(),
            harbor_instance.to_string(),
        )]));

        NetworkPolicy {
            metadata,
            spec: Some(NetworkPolicySpec {
                pod_selector: LabelSelector {
                    match_labels: Some(self.selector_labels()),
                    ..Default::default()
                },
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    from: Some(vec![NetworkPolicyPeer {
                        pod_selector: Some(LabelSelector {
                            match_labels: Some(BTreeMap::from([(
                                LABEL_PART_OF.to_string(),
                                "harbor".to_string(),
                            )])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ports: Some(
                        ports
                            .iter()
                            .map(|port| NetworkPolicyPort {
                                port: Some(IntOrString::Int(*port)),
                                protocol: Some("TCP".to_string()),
                                ..Default::default()
                            })
                            .collect(),
                    ),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Ingress routing paths of one host to services
    pub fn ingress(&self, spec: IngressParams<'_>) -> Ingress {
        let mut metadata = self.metadata(spec.name.to_string());
        if !spec.annotations.is_empty() {
            metadata.annotations = Some(spec.annotations.clone());
        }

        let paths = spec
            .routes
            .iter()
            .map(|route| HTTPIngressPath {
                path: Some(route.path.to_string()),
                path_type: "Prefix".to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: route.service.to_string(),
                        port: Some(ServiceBackendPort {
                            number: Some(route.port),
                            ..Default::default()
                        }),
                    }),
                    ..Default::default()
                },
            })
            .collect();

        Ingress {
            metadata,
            spec: Some(IngressSpec {
                ingress_class_name: spec.class.map(str::to_string),
                rules: Some(vec![IngressRule {
                    host: Some(spec.host.to_string()),
                    http: Some(HTTPIngressRuleValue { paths }),
                }]),
                tls: spec.tls_secret.map(|secret| {
                    vec![IngressTLS {
                        hosts: Some(vec![spec.host.to_string()]),
                        secret_name: Some(secret.to_string()),
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Inputs of [`ResourceBuilder::ingress`]
pub struct IngressParams<'a> {
    pub name: &'a str,
    pub host: &'a str,
    pub class: Option<&'a str>,
    pub annotations: &'a BTreeMap<String, String>,
    pub tls_secret: Option<&'a str>,
    pub routes: &'a [IngressRoute<'a>],
}

/// Path prefix served by a service port
pub struct IngressRoute<'a> {
    pub path: &'a str,
    pub service: &'a str,
    pub port: i32,
}

/// Secret of the given type holding string entries
pub fn typed_secret(metadata: ObjectMeta, type_: &str, data: BTreeMap<String, String>) -> Secret {
    Secret {
        metadata,
        type_: Some(type_.to_string()),
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn service_port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

pub fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

pub fn env_from_secret(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Every key of a config map as environment
pub fn env_from_config_map(config_map: &str) -> EnvFromSource {
    EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: config_map.to_string(),
            optional: None,
        }),
        ..Default::default()
    }
}

/// HTTP GET probe on a path of the component port
pub fn http_probe(path: &str, port: i32, https: bool) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            scheme: Some(if https { "HTTPS" } else { "HTTP" }.to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(6),
        ..Default::default()
    }
}

pub fn secret_volume(name: &str, secret: &str, items: &[(&str, &str)]) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            items: if items.is_empty() {
                None
            } else {
                Some(
                    items
                        .iter()
                        .map(|(key, path)| KeyToPath {
                            key: key.to_string(),
                            path: path.to_string(),
                            mode: None,
                        })
                        .collect(),
                )
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn claim_volume(name: &str, claim: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }
}

pub fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(Default::default()),
        ..Default::default()
    }
}

pub fn mount(name: &str, path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        sub_path: sub_path.map(str::to_string),
        ..Default::default()
    }
}

/// Volume and mount of an internal TLS secret under `/etc/harbor/ssl/<component>`
pub fn internal_tls(component: Component, secret: &str) -> (Volume, VolumeMount) {
    (
        secret_volume("internal-certificates", secret, &[]),
        mount(
            "internal-certificates",
            &format!("/etc/harbor/ssl/{}", component.name()),
            None,
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1beta1::{Portal, PortalSpec};

    fn create_test_portal(name: &str) -> Portal {
        let mut portal = Portal::new(name, PortalSpec::default());
        portal.metadata.namespace = Some("registry".to_string());
        portal.metadata.uid = Some("test-uid-123".to_string());
        portal
    }

    #[test]
    fn test_build_deployment() {
        let mut portal = create_test_portal("sample-portal");
        portal.spec.component.replicas = Some(2);
        portal
            .spec
            .component
            .node_selector
            .insert("zone".to_string(), "a".to_string());
        let builder =
            ResourceBuilder::new(&portal, Component::Portal, &portal.spec.component, "2.5.0")
                .unwrap();
        let container = builder.container("goharbor/harbor-portal:v2.5.0".to_string());
        let deployment = builder.deployment(vec![container], vec![]);

        assert_eq!(deployment.metadata.name.as_deref(), Some("sample-portal"));
        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(2));
        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.automount_service_account_token, Some(false));
        assert_eq!(
            pod.node_selector.as_ref().unwrap().get("zone"),
            Some(&"a".to_string())
        );
        assert_eq!(pod.containers[0].name, "portal");
        assert!(pod.volumes.is_none());
    }

    #[test]
    fn test_labels() {
        let portal = create_test_portal("sample-portal");
        let builder =
            ResourceBuilder::new(&portal, Component::Portal, &portal.spec.component, "2.5.0")
                .unwrap();
        let labels = builder.labels();
        assert_eq!(labels.get(LABEL_NAME), Some(&"portal".to_string()));
        assert_eq!(labels.get(LABEL_INSTANCE), Some(&"sample-portal".to_string()));
        assert_eq!(labels.get(LABEL_MANAGED_BY), Some(&OPERATOR_NAME.to_string()));
        assert_eq!(builder.selector_labels().len(), 2);
    }

    #[test]
    fn test_build_service() {
        let portal = create_test_portal("sample-portal");
        let builder =
            ResourceBuilder::new(&portal, Component::Portal, &portal.spec.component, "2.5.0")
                .unwrap();
        let service = builder.default_service(true);
        let ports = service.spec.as_ref().unwrap().ports.as_ref().unwrap();
        assert_eq!(ports[0].port, 443);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn test_build_secret_is_base64_data() {
        let portal = create_test_portal("sample-portal");
        let builder =
            ResourceBuilder::new(&portal, Component::Portal, &portal.spec.component, "2.5.0")
                .unwrap();
        let secret = builder.secret(
            builder.child_name("secret"),
            BTreeMap::from([("password".to_string(), "s3cret".to_string())]),
        );
        let json = serde_json::to_value(&secret).unwrap();
        assert_eq!(json["data"]["password"], "czNjcmV0");
        assert_eq!(secret.metadata.name.as_deref(), Some("sample-portal-secret"));
    }

    #[test]
    fn test_build_ingress() {
        let portal = create_test_portal("sample-core");
        let builder =
            ResourceBuilder::new(&portal, Component::Core, &portal.spec.component, "2.5.0")
                .unwrap();
        let annotations = BTreeMap::new();
        let ingress = builder.ingress(IngressParams {
            name: "sample-core",
            host: "harbor.example.com",
            class: Some("nginx"),
            annotations: &annotations,
            tls_secret: Some("public-tls"),
            routes: &[
                IngressRoute {
                    path: "/api/",
                    service: "sample-core",
                    port: 80,
                },
                IngressRoute {
                    path: "/",
                    service: "sample-portal",
                    port: 80,
                },
            ],
        });
        let spec = ingress.spec.unwrap();
        assert_eq!(spec.ingress_class_name.as_deref(), Some("nginx"));
        let rule = &spec.rules.unwrap()[0];
        assert_eq!(rule.http.as_ref().unwrap().paths.len(), 2);
        assert_eq!(
            spec.tls.unwrap()[0].secret_name.as_deref(),
            Some("public-tls")
        );
    }

    #[test]
    fn test_network_policy() {
        let portal = create_test_portal("sample-registry");
        let builder =
            ResourceBuilder::new(&portal, Component::Registry, &portal.spec.component, "2.5.0")
                .unwrap();
        let policy = builder.network_policy("sample", &[5000]);
        let spec = policy.spec.unwrap();
        assert_eq!(spec.policy_types, Some(vec!["Ingress".to_string()]));
        assert_eq!(
            policy.metadata.annotations.unwrap().get("goharbor.io/harbor"),
            Some(&"sample".to_string())
        );
    }
}
