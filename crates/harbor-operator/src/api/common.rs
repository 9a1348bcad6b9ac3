//! Types shared by every goharbor.io kind and both API versions

use crate::images::ImageOptions;
use k8s_openapi::api::core::v1::{LocalObjectReference, ResourceRequirements, Toleration};
use regex::Regex;
use schemars::gen::SchemaGenerator;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Annotation carrying the Harbor version a component belongs to
pub const ANNOTATION_HARBOR_VERSION: &str = "harbor.goharbor.io/version";

/// API group of every kind served by the operator
pub const GROUP: &str = "goharbor.io";

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$").unwrap());

static LOG_LEVELS: [&str; 5] = ["debug", "info", "warning", "error", "fatal"];

static PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];

/// Object schema that keeps every field, for embedded Kubernetes types
pub fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

/// List of free-form objects
pub fn preserve_unknown_list(gen: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(preserve_unknown_fields(gen).into()),
            ..Default::default()
        })),
        ..Default::default()
    })
}

pub(crate) fn validate_k8s_name(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > 253 || !NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_name")
            .with_message(format!("'{}' is not a valid Kubernetes name", value).into()));
    }
    Ok(())
}

pub(crate) fn validate_log_level(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || LOG_LEVELS.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level").with_message(
            format!("log level must be one of {}", LOG_LEVELS.join(", ")).into(),
        ))
    }
}

fn validate_pull_policy(value: &str) -> Result<(), ValidationError> {
    if PULL_POLICIES.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_pull_policy")
            .with_message(format!("'{}' is not a valid image pull policy", value).into()))
    }
}

fn validate_image(value: &str) -> Result<(), ValidationError> {
    if value.contains("..") || value.starts_with('/') || value.starts_with('-') {
        return Err(ValidationError::new("invalid_image")
            .with_message(format!("'{}' is not a valid container image", value).into()));
    }
    Ok(())
}

/// Deployment knobs every component accepts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 100, message = "replicas must be between 0 and 100"))]
    pub replicas: Option<i32>,

    /// Image overriding the one derived from the Harbor version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_image"))]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_pull_policy"))]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "preserve_unknown_list")]
    pub tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub service_account_name: Option<String>,

    /// Extra annotations on the pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template_annotations: BTreeMap<String, String>,
}

impl ComponentSpec {
    pub fn image_options(&self) -> ImageOptions<'_> {
        ImageOptions {
            image: self.image.as_deref(),
            ..Default::default()
        }
    }

    pub fn pull_secrets(&self) -> Option<Vec<LocalObjectReference>> {
        if self.image_pull_secrets.is_empty() {
            return None;
        }
        Some(
            self.image_pull_secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect(),
        )
    }

    /// Whether both specs schedule pods onto the same nodes
    pub fn same_scheduling(&self, other: &ComponentSpec) -> bool {
        self.node_selector == other.node_selector && self.tolerations == other.tolerations
    }
}

/// Where component images come from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImageSourceSpec {
    /// Repository prefix, e.g. `registry.example.com/goharbor`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Appended to every image tag, e.g. `-arm64`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_suffix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_pull_policy"))]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

/// Internal TLS settings of a component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ComponentsTlsSpec {
    /// Secret holding `tls.crt`, `tls.key` and `ca.crt`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub certificate_ref: String,
}

/// Prometheus metrics endpoint of a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSpec {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: i32,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_metrics_port() -> i32 {
    8001
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// One PostgreSQL endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PostgresHost {
    #[validate(length(min = 1, message = "host is required"))]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 65535))]
    pub port: Option<i32>,
}

/// PostgreSQL connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PostgresConnection {
    #[validate(length(min = 1, message = "at least one host is required"), nested)]
    pub hosts: Vec<PostgresHost>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Secret holding the password under `password`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub password_ref: Option<String>,

    /// Database name prefix; components append their own suffix when needed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
}

impl PostgresConnection {
    /// First host and its port
    pub fn primary(&self) -> (String, i32) {
        self.hosts
            .first()
            .map(|h| (h.host.clone(), h.port.unwrap_or(5432)))
            .unwrap_or_default()
    }

    pub fn database_or(&self, fallback: &str) -> String {
        self.database.clone().unwrap_or_else(|| fallback.to_string())
    }
}

/// Redis connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedisConnection {
    #[validate(length(min = 1, message = "host is required"))]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 65535))]
    pub port: Option<i32>,

    /// Secret holding the password under `redis-password`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub password_ref: Option<String>,

    /// Sentinel master set, when `host` points at sentinels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentinel_master_set: Option<String>,
}

impl RedisConnection {
    /// `redis://` or `redis+sentinel://` URL for a database index
    pub fn url(&self, database: u8) -> String {
        match &self.sentinel_master_set {
            Some(master) => format!(
                "redis+sentinel://{}:{}/{}/{}",
                self.host,
                self.port.unwrap_or(26379),
                master,
                database
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.host,
                self.port.unwrap_or(6379),
                database
            ),
        }
    }
}

/// Outgoing proxy settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub no_proxy: Vec<String>,
}

/// Persistent volume claim used as storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemStorage {
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub claim_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

/// S3 compatible object storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct S3Storage {
    #[validate(length(min = 1, message = "bucket is required"))]
    pub bucket: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_endpoint: Option<String>,

    /// Secret holding `accesskey` and `secretkey`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_k8s_name"))]
    pub credentials_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
}

/// Azure blob storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AzureStorage {
    #[validate(length(min = 1))]
    pub account_name: String,

    /// Secret holding the account key under `accountkey`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub account_key_ref: String,

    #[validate(length(min = 1))]
    pub container: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Google cloud storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GcsStorage {
    #[validate(length(min = 1))]
    pub bucket: String,

    /// Secret holding the service account key under `gcs-key.json`
    #[validate(length(min = 1), custom(function = "validate_k8s_name"))]
    pub key_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<String>,
}

/// Storage driver, exactly one must be set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StorageDriverSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub file_system: Option<FileSystemStorage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub s3: Option<S3Storage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub azure: Option<AzureStorage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub gcs: Option<GcsStorage>,
}

impl StorageDriverSpec {
    /// Names of the configured drivers
    pub fn configured(&self) -> Vec<&'static str> {
        let mut drivers = Vec::new();
        if self.file_system.is_some() {
            drivers.push("fileSystem");
        }
        if self.s3.is_some() {
            drivers.push("s3");
        }
        if self.azure.is_some() {
            drivers.push("azure");
        }
        if self.gcs.is_some() {
            drivers.push("gcs");
        }
        drivers
    }

    /// Driver name in the registry configuration
    pub fn driver_name(&self) -> &'static str {
        if self.s3.is_some() {
            "s3"
        } else if self.azure.is_some() {
            "azure"
        } else if self.gcs.is_some() {
            "gcs"
        } else {
            "filesystem"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserve_unknown_schema() {
        let mut gen = SchemaGenerator::default();
        let schema = serde_json::to_value(preserve_unknown_fields(&mut gen)).unwrap();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["x-kubernetes-preserve-unknown-fields"], true);

        let list = serde_json::to_value(preserve_unknown_list(&mut gen)).unwrap();
        assert_eq!(list["type"], "array");
        assert_eq!(list["items"]["x-kubernetes-preserve-unknown-fields"], true);
    }

    #[test]
    fn test_component_spec_validation() {
        let spec = ComponentSpec {
            replicas: Some(-1),
            image_pull_policy: Some("Sometimes".into()),
            ..Default::default()
        };
        let errors = spec.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("replicas"));
        assert!(fields.contains_key("image_pull_policy"));

        assert!(ComponentSpec::default().validate().is_ok());
    }

    #[test]
    fn test_redis_url() {
        let redis = RedisConnection {
            host: "redis".into(),
            ..Default::default()
        };
        assert_eq!(redis.url(2), "redis://redis:6379/2");

        let sentinel = RedisConnection {
            host: "rfs-cache".into(),
            sentinel_master_set: Some("mymaster".into()),
            ..Default::default()
        };
        assert_eq!(sentinel.url(0), "redis+sentinel://rfs-cache:26379/mymaster/0");
    }

    #[test]
    fn test_storage_driver() {
        let storage = StorageDriverSpec {
            s3: Some(S3Storage {
                bucket: "harbor".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(storage.driver_name(), "s3");
        assert_eq!(storage.configured(), vec!["s3"]);
        assert!(StorageDriverSpec::default().configured().is_empty());
    }

    #[test]
    fn test_postgres_primary() {
        let db = PostgresConnection {
            hosts: vec![PostgresHost {
                host: "pg".into(),
                port: None,
            }],
            ..Default::default()
        };
        assert_eq!(db.primary(), ("pg".to_string(), 5432));
        assert_eq!(db.database_or("registry"), "registry");
    }
}
