//! Admission defaults
//!
//! Defaults are applied on the raw object so the mutating webhook can
//! answer with a JSON patch of exactly what changed.

use super::v1beta1;
use crate::version;
use serde_json::{Map, Value};

/// RedisFailover operator version assumed when none is declared
pub const REDIS_FAILOVER_OPERATOR_VERSION: &str = "1.0.0";
/// Zalando postgres operator version assumed when none is declared
pub const ZLANDO_OPERATOR_VERSION: &str = "1.5.0";
/// MinIO operator version assumed when none is declared
pub const MINIO_OPERATOR_VERSION: &str = "4.0.3";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_JOBSERVICE_WORKERS: i64 = 10;

/// Kinds whose spec carries a `logLevel`
const LOG_LEVEL_KINDS: [&str; 11] = [
    "Core",
    "Registry",
    "RegistryController",
    "JobService",
    "ChartMuseum",
    "Trivy",
    "NotaryServer",
    "NotarySigner",
    "Exporter",
    "Harbor",
    "HarborCluster",
];

fn set_missing(map: &mut Map<String, Value>, key: &str, value: Value) -> bool {
    if map.get(key).is_some_and(|v| !v.is_null()) {
        return false;
    }
    map.insert(key.to_string(), value);
    true
}

fn object_at<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Map<String, Value>> {
    let mut current = value;
    for key in path {
        current = current.get_mut(*key)?;
    }
    current.as_object_mut()
}

/// Fill in defaults, returning whether anything changed
pub fn apply(object: &mut Value) -> bool {
    let kind = object
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let api_version = object
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let Some(spec) = object_at(object, &["spec"]) else {
        return false;
    };

    let mut changed = false;

    if LOG_LEVEL_KINDS.contains(&kind.as_str()) {
        changed |= set_missing(spec, "logLevel", Value::from(DEFAULT_LOG_LEVEL));
    }

    match kind.as_str() {
        "Harbor" | "HarborCluster" => {
            changed |= set_missing(spec, "version", Value::from(version::default_version()));
        }
        "JobService" => {
            changed |= set_missing(spec, "workers", Value::from(DEFAULT_JOBSERVICE_WORKERS));
        }
        _ => {}
    }

    if kind == "HarborCluster" && api_version == v1beta1::API_VERSION {
        changed |= backend_operator_versions(object);
    }

    changed
}

fn backend_operator_versions(object: &mut Value) -> bool {
    let backends = [
        (
            "cache",
            v1beta1::CACHE_KIND_REDIS_FAILOVER,
            "redisFailover",
            REDIS_FAILOVER_OPERATOR_VERSION,
        ),
        (
            "database",
            v1beta1::DATABASE_KIND_ZLANDO_POSTGRESQL,
            "zlandoPostgreSql",
            ZLANDO_OPERATOR_VERSION,
        ),
        (
            "storage",
            v1beta1::STORAGE_KIND_MINIO,
            "minio",
            MINIO_OPERATOR_VERSION,
        ),
    ];

    let mut changed = false;
    for (field, kind, key, operator_version) in backends {
        let declared = object
            .pointer(&format!("/spec/{}/kind", field))
            .and_then(Value::as_str)
            == Some(kind);
        if !declared {
            continue;
        }
        if let Some(backend) = object_at(object, &["spec", field, "spec", key]) {
            changed |= set_missing(backend, "operatorVersion", Value::from(operator_version));
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_harbor_defaults() {
        let mut object = json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "Harbor",
            "spec": {"externalURL": "https://harbor.example.com"}
        });
        assert!(apply(&mut object));
        assert_eq!(object["spec"]["version"], version::default_version());
        assert_eq!(object["spec"]["logLevel"], "info");
        assert!(!apply(&mut object));
    }

    #[test]
    fn test_declared_values_kept() {
        let mut object = json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "Harbor",
            "spec": {"version": "2.4.3", "logLevel": "debug"}
        });
        assert!(!apply(&mut object));
        assert_eq!(object["spec"]["version"], "2.4.3");
    }

    #[test]
    fn test_backend_operator_versions() {
        let mut object = json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "HarborCluster",
            "spec": {
                "version": "2.5.0",
                "logLevel": "info",
                "cache": {"kind": "RedisFailover", "spec": {"redisFailover": {}}},
                "database": {"kind": "PostgreSQL", "spec": {"postgresSql": {"hosts": []}}},
                "storage": {"kind": "MinIO", "spec": {"minio": {"operatorVersion": "4.1.0"}}}
            }
        });
        assert!(apply(&mut object));
        assert_eq!(
            object["spec"]["cache"]["spec"]["redisFailover"]["operatorVersion"],
            REDIS_FAILOVER_OPERATOR_VERSION
        );
        assert!(object["spec"]["database"]["spec"]["postgresSql"]
            .get("operatorVersion")
            .is_none());
        assert_eq!(
            object["spec"]["storage"]["spec"]["minio"]["operatorVersion"],
            "4.1.0"
        );
    }

    #[test]
    fn test_portal_and_missing_spec() {
        let mut portal = json!({"apiVersion": "goharbor.io/v1beta1", "kind": "Portal", "spec": {}});
        assert!(!apply(&mut portal));

        let mut jobservice = json!({"apiVersion": "goharbor.io/v1beta1", "kind": "JobService"});
        assert!(!apply(&mut jobservice));
    }

    #[test]
    fn test_jobservice_workers() {
        let mut object = json!({"apiVersion": "goharbor.io/v1alpha3", "kind": "JobService", "spec": {}});
        assert!(apply(&mut object));
        assert_eq!(object["spec"]["workers"], 10);
    }
}
