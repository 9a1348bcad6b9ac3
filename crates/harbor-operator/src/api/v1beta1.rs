//! goharbor.io/v1beta1, the hub version
//!
//! Every other version converts through these types and the reconcilers
//! only ever work on them.

use super::common::*;
use crate::status::ComponentStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub const API_VERSION: &str = "goharbor.io/v1beta1";

/// `cache.kind` for an external Redis
pub const CACHE_KIND_REDIS: &str = "Redis";
/// `cache.kind` for an in-cluster spotahome RedisFailover
pub const CACHE_KIND_REDIS_FAILOVER: &str = "RedisFailover";
/// `database.kind` for an external PostgreSQL
pub const DATABASE_KIND_POSTGRESQL: &str = "PostgreSQL";
/// `database.kind` for an in-cluster Zalando PostgreSQL
pub const DATABASE_KIND_ZLANDO_POSTGRESQL: &str = "Zlando/PostgreSQL";
/// `storage.kind` for an in-cluster MinIO tenant
pub const STORAGE_KIND_MINIO: &str = "MinIO";
pub const STORAGE_KIND_FILESYSTEM: &str = "FileSystem";
pub const STORAGE_KIND_S3: &str = "S3";
pub const STORAGE_KIND_AZURE: &str = "Azure";
pub const STORAGE_KIND_GCS: &str = "Gcs";

pub(crate) fn default_log_level() -> String {
    "info".to_string()
}

pub(crate) fn default_version() -> String {
    crate::version::default_version()
}

fn default_workers() -> i32 {
    10
}

fn validate_external_url(value: &str) -> Result<(), ValidationError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_url")
            .with_message(format!("'{}' must be an http(s) URL", value).into()))
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Where Core finds its peers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CoreComponentsSpec {
    #[validate(length(min = 1))]
    pub registry_url: String,

    #[validate(length(min = 1))]
    pub registry_controller_url: String,

    /// Secret with `username` and `password` for the registry basic auth
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub registry_credentials_ref: String,

    #[validate(length(min = 1))]
    pub jobservice_url: String,

    /// Secret shared with the job service under `secret`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub jobservice_secret_ref: String,

    #[validate(length(min = 1))]
    pub portal_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chartmuseum_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trivy_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notary_url: Option<String>,
}

/// Harbor core API
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Core",
    plural = "cores",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CoreSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    /// URL users reach Harbor at
    #[validate(custom(function = "validate_external_url"))]
    pub external_endpoint: String,

    #[validate(nested)]
    pub database: PostgresConnection,

    #[validate(nested)]
    pub redis: RedisConnection,

    /// Secret with the core secret under `secret`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub secret_ref: String,

    /// Secret with the 16 character encryption key under `secretKey`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub encryption_key_ref: String,

    /// Secret with the CSRF key under `key`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub csrf_key_ref: String,

    /// Secret with the initial admin password under `password`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub admin_initial_password_ref: String,

    /// TLS secret used to sign registry tokens
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub token_issuer_ref: String,

    #[validate(nested)]
    pub components: CoreComponentsSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub tls: Option<ComponentsTlsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub metrics: Option<MetricsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
}

/// Docker distribution registry
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Registry",
    plural = "registries",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    #[validate(nested)]
    pub storage: StorageDriverSpec,

    /// Secret with the HTTP secret under `secret`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub http_secret_ref: String,

    /// Secret with the htpasswd file under `htpasswd`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub authentication_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub redis: Option<RedisConnection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub tls: Option<ComponentsTlsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub metrics: Option<MetricsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
}

/// Registry controller sidecar service
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "RegistryController",
    plural = "registrycontrollers",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Registry", "type":"string", "jsonPath":".spec.registryRef"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RegistryControllerSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    /// Name of the Registry whose storage is shared
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub registry_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub tls: Option<ComponentsTlsSpec>,
}

/// Asynchronous job service
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "JobService",
    plural = "jobservices",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct JobServiceSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    #[validate(length(min = 1))]
    pub core_url: String,

    /// Secret with the job service secret under `secret`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub secret_ref: String,

    /// Secret with the core secret under `secret`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub core_secret_ref: String,

    /// Secret with `username` and `password` for the registry
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub registry_credentials_ref: String,

    #[validate(nested)]
    pub redis: RedisConnection,

    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 100))]
    pub workers: i32,

    /// Claim receiving job logs, stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_claim_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub tls: Option<ComponentsTlsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub metrics: Option<MetricsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
}

/// Web portal
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Portal",
    plural = "portals",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PortalSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub tls: Option<ComponentsTlsSpec>,
}

/// Helm chart repository
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "ChartMuseum",
    plural = "chartmuseums",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    #[validate(nested)]
    pub storage: StorageDriverSpec,

    /// URL charts are served at
    #[validate(custom(function = "validate_external_url"))]
    pub chart_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub cache: Option<RedisConnection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub tls: Option<ComponentsTlsSpec>,
}

/// Trivy cache and report volumes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrivyStorageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_claim_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_claim_name: Option<String>,
}

/// Trivy vulnerability scanner adapter
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Trivy",
    plural = "trivies",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TrivySpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    #[validate(nested)]
    pub redis: RedisConnection,

    /// Secret with a GitHub token under `github-token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub github_token_ref: Option<String>,

    #[serde(default)]
    pub skip_update: bool,

    #[serde(default)]
    pub offline_scan: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,

    #[serde(default)]
    pub storage: TrivyStorageSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub tls: Option<ComponentsTlsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
}

/// Token authentication of the notary server against core
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NotaryAuthSpec {
    /// Token service URL on core
    #[validate(length(min = 1))]
    pub realm: String,

    /// TLS secret whose certificate verifies tokens
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub certificate_ref: String,
}

/// Notary server
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "NotaryServer",
    plural = "notaryservers",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NotaryServerSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    #[validate(nested)]
    pub storage: PostgresConnection,

    /// `host:port` of the signer
    #[validate(length(min = 1))]
    pub signer_address: String,

    /// TLS secret trusted when talking to the signer
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub signer_certificate_ref: String,

    #[validate(nested)]
    pub auth: NotaryAuthSpec,

    #[serde(default)]
    pub migration_enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub tls: Option<ComponentsTlsSpec>,
}

/// Notary signer
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "NotarySigner",
    plural = "notarysigners",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NotarySignerSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    #[validate(nested)]
    pub storage: PostgresConnection,

    /// TLS secret served on the signer gRPC port
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub authentication_ref: String,

    /// Secret with the key passphrase under `passphrase`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub default_alias_ref: String,

    #[serde(default)]
    pub migration_enabled: bool,
}

/// Metrics exporter
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Exporter",
    plural = "exporters",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExporterSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    #[validate(length(min = 1))]
    pub core_url: String,

    #[validate(nested)]
    pub database: PostgresConnection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0))]
    pub cache_duration_seconds: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub tls: Option<ComponentsTlsSpec>,
}

/// Robot account credentials exposed as a pull secret
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "RobotAccount",
    plural = "robotaccounts",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Harbor", "type":"string", "jsonPath":".spec.harborRef"}"#,
    printcolumn = r#"{"name":"Project", "type":"string", "jsonPath":".spec.project"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RobotAccountSpec {
    /// Name of the Harbor in the same namespace
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub harbor_ref: String,

    #[validate(length(min = 1, max = 255))]
    pub project: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,

    /// Name of the generated pull secret, `<name>-pull-secret` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub pull_secret_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Harbor
// ---------------------------------------------------------------------------

/// Internal TLS between components
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InternalTlsSpec {
    #[serde(default)]
    pub enabled: bool,
}

/// Ingress exposing a component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[validate(length(min = 1, message = "ingress host is required"))]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub annotations: std::collections::BTreeMap<String, String>,
}

/// TLS of an exposed component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExposeTlsSpec {
    /// Secret holding the public certificate
    #[validate(length(min = 1, message = "certificateRef is required"))]
    pub certificate_ref: String,
}

/// How one component is reached from outside
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExposeComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub ingress: Option<IngressSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub tls: Option<ExposeTlsSpec>,
}

/// External exposure of Harbor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HarborExposeSpec {
    #[serde(default)]
    #[validate(nested)]
    pub core: ExposeComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub notary: Option<ExposeComponentSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobServiceComponentSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 100))]
    pub workers: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_claim_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumComponentSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    /// Serve absolute chart URLs
    #[serde(default)]
    pub absolute_url: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrivyComponentSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub component: ComponentSpec,

    #[serde(default)]
    pub skip_update: bool,

    #[serde(default)]
    pub offline_scan: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub github_token_ref: Option<String>,

    #[serde(default)]
    pub storage: TrivyStorageSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NotaryComponentSpec {
    #[serde(default)]
    #[validate(nested)]
    pub server: ComponentSpec,

    #[serde(default)]
    #[validate(nested)]
    pub signer: ComponentSpec,

    #[serde(default)]
    pub migration_enabled: bool,
}

/// Everything a Harbor declares besides its backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedHarborSpec {
    #[serde(default = "default_version")]
    pub version: String,

    #[validate(custom(function = "validate_external_url"))]
    #[serde(rename = "externalURL")]
    pub external_url: String,

    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub image_source: Option<ImageSourceSpec>,

    /// Secret with the initial admin password under `password`, generated when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub harbor_admin_password_ref: Option<String>,

    /// Secret with the encryption key under `secretKey`, generated when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub encryption_key_ref: Option<String>,

    #[serde(default)]
    pub internal_tls: InternalTlsSpec,

    #[serde(default)]
    #[validate(nested)]
    pub expose: HarborExposeSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub core: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub portal: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub registry: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub registry_controller: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub jobservice: Option<JobServiceComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub chartmuseum: Option<ChartMuseumComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub trivy: Option<TrivyComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub notary: Option<NotaryComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub exporter: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
}

/// A Harbor installation on top of existing backends
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Harbor",
    plural = "harbors",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".spec.externalURL"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HarborSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub harbor: EmbeddedHarborSpec,

    #[validate(nested)]
    pub database: PostgresConnection,

    #[validate(nested)]
    pub redis: RedisConnection,

    #[validate(nested)]
    pub image_chart_storage: StorageDriverSpec,
}

// ---------------------------------------------------------------------------
// HarborCluster
// ---------------------------------------------------------------------------

/// Storage of an in-cluster backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Requested size, e.g. `1Gi`
    pub size: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisServerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<VolumeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// In-cluster Redis, shape shared by both versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InClusterRedisSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<RedisServerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentinel: Option<RedisSentinelSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisFailoverSpec {
    /// Version of the RedisFailover operator the CR targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_version: Option<String>,

    #[serde(flatten)]
    pub redis: InClusterRedisSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub redis: Option<RedisConnection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_failover: Option<RedisFailoverSpec>,
}

/// Cache backend, discriminated by `kind`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Cache {
    pub kind: String,

    #[serde(default)]
    #[validate(nested)]
    pub spec: CacheSpec,
}

/// In-cluster PostgreSQL, shape shared by both versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InClusterPostgresSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<VolumeSpec>,

    /// PostgreSQL major version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZlandoPostgresSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_version: Option<String>,

    #[serde(flatten)]
    pub postgres: InClusterPostgresSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub postgres_sql: Option<PostgresConnection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zlando_postgre_sql: Option<ZlandoPostgresSpec>,
}

/// Database backend, discriminated by `kind`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub kind: String,

    #[serde(default)]
    #[validate(nested)]
    pub spec: DatabaseSpec,
}

/// In-cluster MinIO, shape shared by both versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InClusterMinioSpec {
    pub replicas: i32,

    pub volumes_per_server: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MinioSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_version: Option<String>,

    #[serde(flatten)]
    pub minio: InClusterMinioSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub driver: StorageDriverSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minio: Option<MinioSpec>,
}

/// Image and chart storage backend, discriminated by `kind`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    pub kind: String,

    #[serde(default)]
    #[validate(nested)]
    pub spec: StorageSpec,
}

/// `storage.kind` matching a driver
pub fn storage_kind(driver: &StorageDriverSpec) -> &'static str {
    match driver.driver_name() {
        "s3" => STORAGE_KIND_S3,
        "azure" => STORAGE_KIND_AZURE,
        "gcs" => STORAGE_KIND_GCS,
        _ => STORAGE_KIND_FILESYSTEM,
    }
}

/// A complete Harbor with its backends
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "HarborCluster",
    plural = "harborclusters",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".spec.externalURL"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HarborClusterSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub harbor: EmbeddedHarborSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub cache: Option<Cache>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub database: Option<Database>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub storage: Option<Storage>,
}
