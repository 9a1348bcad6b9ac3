//! Admission validation
//!
//! Field level checks come from the `validator` derives on the spec types.
//! Rules spanning several fields live here and report Kubernetes style
//! field errors so the webhook can answer with precise paths.

use super::common::StorageDriverSpec;
use super::{v1alpha3, v1beta1};
use crate::version;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// Flattened struct fields that do not appear in the object path
const FLATTENED_FIELDS: [&str; 4] = ["component", "harbor", "inner", "driver"];

/// Minimum drive count of a MinIO tenant in erasure mode
const MINIO_MIN_DRIVES: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldErrorKind {
    Required,
    Forbidden,
    Invalid,
}

impl fmt::Display for FieldErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldErrorKind::Required => write!(f, "Required value"),
            FieldErrorKind::Forbidden => write!(f, "Forbidden"),
            FieldErrorKind::Invalid => write!(f, "Invalid value"),
        }
    }
}

/// A rejected field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub kind: FieldErrorKind,
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn required(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FieldErrorKind::Required,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn forbidden(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FieldErrorKind::Forbidden,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FieldErrorKind::Invalid,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.path, self.kind, self.message)
    }
}

/// Join errors into one admission message
pub fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    match out.as_str() {
        "externalUrl" => "externalURL".to_string(),
        _ => out,
    }
}

fn join(prefix: &str, field: &str) -> String {
    if FLATTENED_FIELDS.contains(&field) {
        prefix.to_string()
    } else {
        format!("{}.{}", prefix, camel_case(field))
    }
}

/// Turn derive errors into field errors rooted at `prefix`
pub fn from_validation_errors(prefix: &str, errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out = Vec::new();
    collect(prefix, errors, &mut out);
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

fn collect(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = join(prefix, field);
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| error.code.to_string());
                    out.push(FieldError::invalid(path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(nested) => collect(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect(&format!("{}[{}]", path, index), nested, out);
                }
            }
        }
    }
}

fn derive_errors<T: Validate>(spec: &T) -> Vec<FieldError> {
    match spec.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => from_validation_errors("spec", &errors),
    }
}

/// Version checks: plain on create, upgrade ladder on update
pub fn version_errors(version: &str, old_version: Option<&str>) -> Vec<FieldError> {
    let result = match old_version {
        Some(old) if old != version => version::validate_upgrade(old, version).map(|_| ()),
        Some(_) => Ok(()),
        None => version::validate(version).map(|_| ()),
    };
    match result {
        Ok(()) => Vec::new(),
        Err(e) => vec![FieldError::invalid("spec.version", e.to_string())],
    }
}

/// Rules shared by Harbor and HarborCluster
pub fn embedded_harbor_errors(spec: &v1beta1::EmbeddedHarborSpec) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if spec.notary.is_some() {
        match &spec.expose.notary {
            None => errors.push(FieldError::required(
                "spec.expose.notary",
                "notary must be exposed when it is enabled",
            )),
            Some(expose) => {
                if expose.ingress.as_ref().is_none_or(|i| i.host.is_empty()) {
                    errors.push(FieldError::required(
                        "spec.expose.notary.ingress.host",
                        "notary requires an ingress host",
                    ));
                }
                if expose.tls.as_ref().is_none_or(|t| t.certificate_ref.is_empty()) {
                    errors.push(FieldError::required(
                        "spec.expose.notary.tls.certificateRef",
                        "notary is only served over TLS",
                    ));
                }
            }
        }
    }

    errors
}

/// Exactly one storage driver, with registry controller scheduling pinned
/// to the registry when both mount the same volume
pub fn storage_driver_errors(
    path: &str,
    driver: &StorageDriverSpec,
    harbor: &v1beta1::EmbeddedHarborSpec,
) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let configured = driver.configured();
    match configured.len() {
        0 => errors.push(FieldError::required(
            path,
            "one of fileSystem, s3, azure or gcs is required",
        )),
        1 => {}
        _ => errors.push(FieldError::forbidden(
            path,
            format!("only one driver may be set, found {}", configured.join(", ")),
        )),
    }

    if driver.file_system.is_some() {
        if let Some(controller) = &harbor.registry_controller {
            let registry = harbor.registry.clone().unwrap_or_default();
            let pinned = !controller.node_selector.is_empty() || !controller.tolerations.is_empty();
            if pinned && !controller.same_scheduling(&registry) {
                errors.push(FieldError::invalid(
                    "spec.registryController",
                    "nodeSelector and tolerations must match the registry when storage is a file system",
                ));
            }
        }
    }

    errors
}

fn minio_errors(path: &str, minio: &v1beta1::InClusterMinioSpec) -> Vec<FieldError> {
    let drives = minio.replicas.saturating_mul(minio.volumes_per_server);
    if minio.replicas < 1 || minio.volumes_per_server < 1 || drives < MINIO_MIN_DRIVES {
        vec![FieldError::invalid(
            path,
            format!(
                "replicas x volumesPerServer must be at least {}, got {}",
                MINIO_MIN_DRIVES, drives
            ),
        )]
    } else {
        Vec::new()
    }
}

/// v1beta1 Harbor
pub fn harbor_errors(spec: &v1beta1::HarborSpec) -> Vec<FieldError> {
    let mut errors = derive_errors(spec);
    errors.extend(embedded_harbor_errors(&spec.harbor));
    errors.extend(storage_driver_errors(
        "spec.imageChartStorage",
        &spec.image_chart_storage,
        &spec.harbor,
    ));
    errors
}

/// v1beta1 HarborCluster backend envelopes
pub fn harbor_cluster_errors(spec: &v1beta1::HarborClusterSpec) -> Vec<FieldError> {
    let mut errors = derive_errors(spec);
    errors.extend(embedded_harbor_errors(&spec.harbor));

    match &spec.cache {
        None => errors.push(FieldError::required("spec.cache", "a cache is required")),
        Some(cache) => match cache.kind.as_str() {
            v1beta1::CACHE_KIND_REDIS => {
                if cache.spec.redis.is_none() {
                    errors.push(FieldError::required(
                        "spec.cache.spec.redis",
                        "required when kind is Redis",
                    ));
                }
                if cache.spec.redis_failover.is_some() {
                    errors.push(FieldError::forbidden(
                        "spec.cache.spec.redisFailover",
                        "not allowed when kind is Redis",
                    ));
                }
            }
            v1beta1::CACHE_KIND_REDIS_FAILOVER => {
                if cache.spec.redis.is_some() {
                    errors.push(FieldError::forbidden(
                        "spec.cache.spec.redis",
                        "not allowed when kind is RedisFailover",
                    ));
                }
            }
            other => errors.push(FieldError::invalid(
                "spec.cache.kind",
                format!("unsupported cache kind '{}'", other),
            )),
        },
    }

    match &spec.database {
        None => errors.push(FieldError::required("spec.database", "a database is required")),
        Some(database) => match database.kind.as_str() {
            v1beta1::DATABASE_KIND_POSTGRESQL => {
                if database.spec.postgres_sql.is_none() {
                    errors.push(FieldError::required(
                        "spec.database.spec.postgresSql",
                        "required when kind is PostgreSQL",
                    ));
                }
                if database.spec.zlando_postgre_sql.is_some() {
                    errors.push(FieldError::forbidden(
                        "spec.database.spec.zlandoPostgreSql",
                        "not allowed when kind is PostgreSQL",
                    ));
                }
            }
            v1beta1::DATABASE_KIND_ZLANDO_POSTGRESQL => {
                if database.spec.postgres_sql.is_some() {
                    errors.push(FieldError::forbidden(
                        "spec.database.spec.postgresSql",
                        "not allowed when kind is Zlando/PostgreSQL",
                    ));
                }
            }
            other => errors.push(FieldError::invalid(
                "spec.database.kind",
                format!("unsupported database kind '{}'", other),
            )),
        },
    }

    match &spec.storage {
        None => errors.push(FieldError::required("spec.storage", "a storage is required")),
        Some(storage) if storage.kind == v1beta1::STORAGE_KIND_MINIO => {
            if !storage.spec.driver.configured().is_empty() {
                errors.push(FieldError::forbidden(
                    "spec.storage.spec",
                    "drivers are not allowed when kind is MinIO",
                ));
            }
            match &storage.spec.minio {
                None => errors.push(FieldError::required(
                    "spec.storage.spec.minio",
                    "required when kind is MinIO",
                )),
                Some(minio) => {
                    errors.extend(minio_errors("spec.storage.spec.minio", &minio.minio))
                }
            }
        }
        Some(storage) => {
            let known = [
                v1beta1::STORAGE_KIND_FILESYSTEM,
                v1beta1::STORAGE_KIND_S3,
                v1beta1::STORAGE_KIND_AZURE,
                v1beta1::STORAGE_KIND_GCS,
            ];
            if !known.contains(&storage.kind.as_str()) {
                errors.push(FieldError::invalid(
                    "spec.storage.kind",
                    format!("unsupported storage kind '{}'", storage.kind),
                ));
            } else {
                let driver_errors =
                    storage_driver_errors("spec.storage.spec", &storage.spec.driver, &spec.harbor);
                let matches = v1beta1::storage_kind(&storage.spec.driver) == storage.kind;
                if driver_errors.is_empty() && !matches {
                    errors.push(FieldError::invalid(
                        "spec.storage.kind",
                        format!("kind {} does not match the configured driver", storage.kind),
                    ));
                }
                errors.extend(driver_errors);
            }
            if storage.spec.minio.is_some() {
                errors.push(FieldError::forbidden(
                    "spec.storage.spec.minio",
                    format!("not allowed when kind is {}", storage.kind),
                ));
            }
        }
    }

    errors
}

fn pair_errors(
    external: (&str, bool),
    in_cluster: (&str, bool),
    provider: Option<(&str, &str)>,
) -> Vec<FieldError> {
    let (external_field, has_external) = external;
    let (in_cluster_field, has_in_cluster) = in_cluster;
    let mut errors = Vec::new();

    match (has_external, has_in_cluster) {
        (true, true) => errors.push(FieldError::forbidden(
            format!("spec.{}", external_field),
            format!("{} and {} are mutually exclusive", external_field, in_cluster_field),
        )),
        (false, false) => errors.push(FieldError::required(
            format!("spec.{}", external_field),
            format!("one of {} or {} is required", external_field, in_cluster_field),
        )),
        _ => {}
    }

    if let Some((declared, expected)) = provider {
        if declared != expected {
            errors.push(FieldError::invalid(
                format!("spec.{}.provider", in_cluster_field),
                format!("unsupported provider '{}', expected {}", declared, expected),
            ));
        }
    }

    errors
}

/// v1alpha3 HarborCluster flat pairs
pub fn harbor_cluster_v1alpha3_errors(spec: &v1alpha3::HarborClusterSpec) -> Vec<FieldError> {
    let mut errors = derive_errors(spec);
    errors.extend(embedded_harbor_errors(&spec.harbor));

    errors.extend(pair_errors(
        ("redis", spec.redis.is_some()),
        ("inClusterCache", spec.in_cluster_cache.is_some()),
        spec.in_cluster_cache
            .as_ref()
            .map(|c| (c.provider.as_str(), v1alpha3::PROVIDER_REDIS)),
    ));
    errors.extend(pair_errors(
        ("database", spec.database.is_some()),
        ("inClusterDatabase", spec.in_cluster_database.is_some()),
        spec.in_cluster_database
            .as_ref()
            .map(|d| (d.provider.as_str(), v1alpha3::PROVIDER_POSTGRESQL)),
    ));
    errors.extend(pair_errors(
        ("imageChartStorage", spec.image_chart_storage.is_some()),
        ("inClusterStorage", spec.in_cluster_storage.is_some()),
        spec.in_cluster_storage
            .as_ref()
            .map(|s| (s.provider.as_str(), v1alpha3::PROVIDER_MINIO)),
    ));

    if let Some(driver) = &spec.image_chart_storage {
        errors.extend(storage_driver_errors(
            "spec.imageChartStorage",
            driver,
            &spec.harbor,
        ));
    }
    if let Some(minio) = spec
        .in_cluster_storage
        .as_ref()
        .and_then(|s| s.minio_spec.as_ref())
    {
        errors.extend(minio_errors("spec.inClusterStorage.minioSpec", minio));
    }

    errors
}

fn decode_spec<T: DeserializeOwned>(object: &Value) -> Result<T, Vec<FieldError>> {
    let spec = object.get("spec").cloned().unwrap_or(Value::Null);
    serde_json::from_value(spec).map_err(|e| vec![FieldError::invalid("spec", e.to_string())])
}

fn spec_version(object: Option<&Value>) -> Option<String> {
    object?
        .pointer("/spec/version")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Validate an admitted object; `old` is set on update
pub fn validate_object(object: &Value, old: Option<&Value>) -> Vec<FieldError> {
    let kind = object.get("kind").and_then(Value::as_str).unwrap_or_default();
    let api_version = object
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let result = match (api_version, kind) {
        (v1beta1::API_VERSION, "Harbor") => {
            decode_spec::<v1beta1::HarborSpec>(object).map(|spec| harbor_errors(&spec))
        }
        (v1alpha3::API_VERSION, "Harbor") => {
            decode_spec::<v1alpha3::HarborSpec>(object).map(|spec| harbor_errors(&spec.inner))
        }
        (v1beta1::API_VERSION, "HarborCluster") => {
            decode_spec::<v1beta1::HarborClusterSpec>(object)
                .map(|spec| harbor_cluster_errors(&spec))
        }
        (v1alpha3::API_VERSION, "HarborCluster") => {
            decode_spec::<v1alpha3::HarborClusterSpec>(object)
                .map(|spec| harbor_cluster_v1alpha3_errors(&spec))
        }
        (_, "Core") => decode_spec::<v1beta1::CoreSpec>(object).map(|s| derive_errors(&s)),
        (_, "Registry") => decode_spec::<v1beta1::RegistrySpec>(object).map(|s| {
            let mut errors = derive_errors(&s);
            let configured = s.storage.configured();
            if configured.len() != 1 {
                errors.push(FieldError::invalid(
                    "spec.storage",
                    "exactly one storage driver must be set",
                ));
            }
            errors
        }),
        (_, "RegistryController") => {
            decode_spec::<v1beta1::RegistryControllerSpec>(object).map(|s| derive_errors(&s))
        }
        (_, "JobService") => {
            decode_spec::<v1beta1::JobServiceSpec>(object).map(|s| derive_errors(&s))
        }
        (_, "Portal") => decode_spec::<v1beta1::PortalSpec>(object).map(|s| derive_errors(&s)),
        (_, "ChartMuseum") => {
            decode_spec::<v1beta1::ChartMuseumSpec>(object).map(|s| derive_errors(&s))
        }
        (_, "Trivy") => decode_spec::<v1beta1::TrivySpec>(object).map(|s| derive_errors(&s)),
        (_, "NotaryServer") => {
            decode_spec::<v1beta1::NotaryServerSpec>(object).map(|s| derive_errors(&s))
        }
        (_, "NotarySigner") => {
            decode_spec::<v1beta1::NotarySignerSpec>(object).map(|s| derive_errors(&s))
        }
        (_, "Exporter") => decode_spec::<v1beta1::ExporterSpec>(object).map(|s| derive_errors(&s)),
        (_, "RobotAccount") => {
            decode_spec::<v1beta1::RobotAccountSpec>(object).map(|s| derive_errors(&s))
        }
        _ => Err(vec![FieldError::invalid(
            "kind",
            format!("unsupported kind {} {}", api_version, kind),
        )]),
    };

    let mut errors = result.unwrap_or_else(|errors| errors);

    if matches!(kind, "Harbor" | "HarborCluster") {
        let declared = spec_version(Some(object)).unwrap_or_else(version::default_version);
        errors.extend(version_errors(&declared, spec_version(old).as_deref()));
    }

    errors
}
