//! Readiness checks for managed resources
//!
//! Each node of the resource graph carries one of these checks. A check
//! returns `Ok(false)` when the object still has work to do and an error
//! when its state cannot be interpreted.

use crate::error::{OperatorError, Result};
use crate::status::{ConditionStatus, CONDITION_FAILED, CONDITION_IN_PROGRESS};
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Endpoints, Pod};
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Keys a TLS secret must carry
pub const TLS_SECRET_KEYS: [&str; 3] = ["tls.crt", "tls.key", "ca.crt"];

/// How to decide whether an object is ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessCheck {
    /// Presence is readiness
    Always,
    /// `tls.crt`, `tls.key` and `ca.crt` are all populated
    TlsSecret,
    /// cert-manager Certificate issued and not expired
    Certificate,
    /// Deployment fully rolled out
    Deployment,
    /// goharbor.io component converged on its generation
    Component,
    /// Pod reports `Ready`
    Pod,
    /// Endpoints expose every named port with no unready address
    Endpoints { ports: Vec<String> },
    /// Derived from `status.conditions`
    Generic,
    /// A top level status field holds the expected value
    StatusField { field: String, expected: String },
}

impl ReadinessCheck {
    /// Default check for a kind
    pub fn for_kind(api_version: &str, kind: &str) -> Self {
        match kind {
            "ConfigMap" | "Secret" | "Service" | "Ingress" | "NetworkPolicy" | "Issuer" => {
                ReadinessCheck::Always
            }
            "Certificate" => ReadinessCheck::Certificate,
            "Deployment" => ReadinessCheck::Deployment,
            "Pod" => ReadinessCheck::Pod,
            "Endpoints" => ReadinessCheck::Endpoints { ports: Vec::new() },
            _ if api_version.starts_with("goharbor.io/") => ReadinessCheck::Component,
            _ => ReadinessCheck::Generic,
        }
    }

    /// Evaluate the check against the remote object
    pub fn is_ready(&self, obj: &DynamicObject) -> Result<bool> {
        match self {
            ReadinessCheck::Always => Ok(true),
            ReadinessCheck::TlsSecret => Ok(tls_secret_ready(obj)),
            ReadinessCheck::Certificate => certificate_ready(obj, Utc::now()),
            ReadinessCheck::Deployment => deployment_ready(&parse(obj)?),
            ReadinessCheck::Component => component_ready(obj, true),
            ReadinessCheck::Pod => Ok(pod_ready(&parse(obj)?)),
            ReadinessCheck::Endpoints { ports } => Ok(endpoints_ready(&parse(obj)?, ports)),
            ReadinessCheck::Generic => component_ready(obj, false),
            ReadinessCheck::StatusField { field, expected } => Ok(obj
                .data
                .get("status")
                .and_then(|s| s.get(field))
                .and_then(Value::as_str)
                == Some(expected.as_str())),
        }
    }
}

fn parse<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn tls_secret_ready(obj: &DynamicObject) -> bool {
    let data = obj.data.get("data");
    TLS_SECRET_KEYS.iter().all(|key| {
        data.and_then(|d| d.get(*key))
            .and_then(Value::as_str)
            .is_some_and(|v| !v.is_empty())
    })
}

fn condition_status(status: &Value, condition_type: &str) -> Option<(ConditionStatus, String)> {
    status
        .get("conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))
        .map(|c| {
            let status = match c.get("status").and_then(Value::as_str) {
                Some("True") => ConditionStatus::True,
                Some("False") => ConditionStatus::False,
                _ => ConditionStatus::Unknown,
            };
            let reason = c
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (status, reason)
        })
}

fn certificate_ready(obj: &DynamicObject, now: DateTime<Utc>) -> Result<bool> {
    let Some(status) = obj.data.get("status") else {
        return Ok(false);
    };

    if !matches!(condition_status(status, "Ready"), Some((ConditionStatus::True, _))) {
        return Ok(false);
    }

    match status.get("notAfter").and_then(Value::as_str) {
        None => Ok(true),
        Some(raw) => {
            let not_after = DateTime::parse_from_rfc3339(raw).map_err(|e| {
                OperatorError::Internal(format!("invalid certificate notAfter '{}': {}", raw, e))
            })?;
            Ok(not_after.with_timezone(&Utc) > now)
        }
    }
}

fn deployment_ready(deployment: &Deployment) -> Result<bool> {
    let generation = deployment.metadata.generation.unwrap_or_default();
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);

    let Some(status) = deployment.status.as_ref() else {
        return Ok(false);
    };

    if status.observed_generation.unwrap_or_default() < generation {
        return Ok(false);
    }

    let counts_match = status.replicas.unwrap_or_default() == desired
        && status.updated_replicas.unwrap_or_default() == desired
        && status.available_replicas.unwrap_or_default() == desired
        && status.ready_replicas.unwrap_or_default() == desired;
    if !counts_match {
        return Ok(false);
    }

    let conditions = status.conditions.as_deref().unwrap_or_default();
    let available = conditions
        .iter()
        .any(|c| c.type_ == "Available" && c.status == "True");
    let progressed = conditions.iter().any(|c| {
        c.type_ == "Progressing"
            && (c.status == "False"
                || (c.status == "True"
                    && c.reason.as_deref() == Some("NewReplicaSetAvailable")))
    });

    Ok(available && progressed)
}

/// Computed status shared by goharbor.io kinds and unknown kinds.
///
/// `require_observed` makes a missing `observedGeneration` count as not
/// reconciled yet, which holds for every kind this operator owns.
fn component_ready(obj: &DynamicObject, require_observed: bool) -> Result<bool> {
    let generation = obj.metadata.generation.unwrap_or_default();
    let status = obj.data.get("status");

    let observed = status
        .and_then(|s| s.get("observedGeneration"))
        .and_then(Value::as_i64);
    match observed {
        Some(observed) if observed < generation => return Ok(false),
        None if require_observed => return Ok(false),
        _ => {}
    }

    let Some(status) = status else {
        return Ok(!require_observed);
    };

    if let Some((ConditionStatus::True, _)) = condition_status(status, CONDITION_FAILED) {
        return Ok(false);
    }
    if let Some((ConditionStatus::True, _)) = condition_status(status, CONDITION_IN_PROGRESS) {
        return Ok(false);
    }
    Ok(true)
}

fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn endpoints_ready(endpoints: &Endpoints, ports: &[String]) -> bool {
    let subsets = endpoints.subsets.as_deref().unwrap_or_default();

    let unready = subsets.iter().any(|s| {
        s.not_ready_addresses
            .as_ref()
            .is_some_and(|addresses| !addresses.is_empty())
    });
    if unready {
        return false;
    }

    ports.iter().all(|wanted| {
        subsets.iter().any(|s| {
            s.ports
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|p| p.name.as_deref() == Some(wanted.as_str()))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn dynamic(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn deployment(
        generation: i64,
        observed: i64,
        counts: [i32; 4],
        conditions: Value,
    ) -> DynamicObject {
        dynamic(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "core", "namespace": "ns", "generation": generation},
            "spec": {
                "replicas": 2,
                "selector": {"matchLabels": {"app": "core"}},
                "template": {"metadata": {"labels": {"app": "core"}}}
            },
            "status": {
                "observedGeneration": observed,
                "replicas": counts[0],
                "updatedReplicas": counts[1],
                "availableReplicas": counts[2],
                "readyReplicas": counts[3],
                "conditions": conditions
            }
        }))
    }

    fn rolled_out() -> Value {
        json!([
            {"type": "Available", "status": "True"},
            {"type": "Progressing", "status": "True", "reason": "NewReplicaSetAvailable"}
        ])
    }

    #[test]
    fn test_always_ready_kinds() {
        for kind in ["ConfigMap", "Secret", "Service", "Ingress", "NetworkPolicy", "Issuer"] {
            assert_eq!(ReadinessCheck::for_kind("v1", kind), ReadinessCheck::Always);
        }
        assert_eq!(
            ReadinessCheck::for_kind("goharbor.io/v1beta1", "Core"),
            ReadinessCheck::Component
        );
        assert_eq!(
            ReadinessCheck::for_kind("acid.zalan.do/v1", "postgresql"),
            ReadinessCheck::Generic
        );
    }

    #[test]
    fn test_tls_secret() {
        let full = dynamic(json!({
            "apiVersion": "v1", "kind": "Secret",
            "metadata": {"name": "tls"},
            "data": {"tls.crt": "YQ==", "tls.key": "Yg==", "ca.crt": "Yw=="}
        }));
        assert!(ReadinessCheck::TlsSecret.is_ready(&full).unwrap());

        let missing_ca = dynamic(json!({
            "apiVersion": "v1", "kind": "Secret",
            "metadata": {"name": "tls"},
            "data": {"tls.crt": "YQ==", "tls.key": "Yg==", "ca.crt": ""}
        }));
        assert!(!ReadinessCheck::TlsSecret.is_ready(&missing_ca).unwrap());
    }

    #[test]
    fn test_certificate() {
        let now = Utc::now();
        let cert = |ready: &str, not_after: Option<String>| {
            let mut status = json!({"conditions": [{"type": "Ready", "status": ready}]});
            if let Some(not_after) = not_after {
                status["notAfter"] = json!(not_after);
            }
            dynamic(json!({
                "apiVersion": "cert-manager.io/v1", "kind": "Certificate",
                "metadata": {"name": "c"},
                "status": status
            }))
        };

        assert!(certificate_ready(&cert("True", None), now).unwrap());
        assert!(!certificate_ready(&cert("False", None), now).unwrap());
        let future = (now + ChronoDuration::days(1)).to_rfc3339();
        assert!(certificate_ready(&cert("True", Some(future)), now).unwrap());
        let past = (now - ChronoDuration::days(1)).to_rfc3339();
        assert!(!certificate_ready(&cert("True", Some(past)), now).unwrap());
        assert!(certificate_ready(&cert("True", Some("garbage".into())), now).is_err());
    }

    #[test]
    fn test_deployment_rules() {
        let check = ReadinessCheck::Deployment;
        assert!(check
            .is_ready(&deployment(2, 2, [2, 2, 2, 2], rolled_out()))
            .unwrap());
        // stale observed generation
        assert!(!check
            .is_ready(&deployment(3, 2, [2, 2, 2, 2], rolled_out()))
            .unwrap());
        // each counter must match
        for i in 0..4 {
            let mut counts = [2, 2, 2, 2];
            counts[i] = 1;
            assert!(!check.is_ready(&deployment(2, 2, counts, rolled_out())).unwrap());
        }
        // progressing false is fine once available
        let settled = json!([
            {"type": "Available", "status": "True"},
            {"type": "Progressing", "status": "False"}
        ]);
        assert!(check.is_ready(&deployment(2, 2, [2, 2, 2, 2], settled)).unwrap());
        // still progressing with another reason
        let rolling = json!([
            {"type": "Available", "status": "True"},
            {"type": "Progressing", "status": "True", "reason": "ReplicaSetUpdated"}
        ]);
        assert!(!check.is_ready(&deployment(2, 2, [2, 2, 2, 2], rolling)).unwrap());
        // unavailable
        let unavailable = json!([
            {"type": "Available", "status": "False"},
            {"type": "Progressing", "status": "False"}
        ]);
        assert!(!check
            .is_ready(&deployment(2, 2, [2, 2, 2, 2], unavailable))
            .unwrap());
    }

    #[test]
    fn test_component_rules() {
        let component = |observed: Option<i64>, conditions: Value| {
            let mut status = json!({"conditions": conditions});
            if let Some(observed) = observed {
                status["observedGeneration"] = json!(observed);
            }
            dynamic(json!({
                "apiVersion": "goharbor.io/v1beta1", "kind": "Core",
                "metadata": {"name": "core", "generation": 4},
                "status": status
            }))
        };
        let check = ReadinessCheck::Component;
        assert!(check.is_ready(&component(Some(4), json!([]))).unwrap());
        assert!(!check.is_ready(&component(None, json!([]))).unwrap());
        assert!(!check.is_ready(&component(Some(3), json!([]))).unwrap());
        assert!(!check
            .is_ready(&component(
                Some(4),
                json!([{"type": "InProgress", "status": "True"}])
            ))
            .unwrap());
        assert!(!check
            .is_ready(&component(Some(4), json!([{"type": "Failed", "status": "True"}])))
            .unwrap());
        assert!(check
            .is_ready(&component(
                Some(4),
                json!([{"type": "InProgress", "status": "False"}, {"type": "Failed", "status": "False"}])
            ))
            .unwrap());
    }

    #[test]
    fn test_generic_without_status() {
        let obj = dynamic(json!({
            "apiVersion": "databases.spotahome.com/v1", "kind": "RedisFailover",
            "metadata": {"name": "cache", "generation": 1}
        }));
        assert!(ReadinessCheck::Generic.is_ready(&obj).unwrap());
    }

    #[test]
    fn test_status_field() {
        let check = ReadinessCheck::StatusField {
            field: "currentState".to_string(),
            expected: "Initialized".to_string(),
        };
        let tenant = |state: &str| {
            dynamic(json!({
                "apiVersion": "minio.min.io/v2", "kind": "Tenant",
                "metadata": {"name": "storage"},
                "status": {"currentState": state}
            }))
        };
        assert!(check.is_ready(&tenant("Initialized")).unwrap());
        assert!(!check.is_ready(&tenant("Provisioning")).unwrap());
        assert!(!check
            .is_ready(&dynamic(json!({
                "apiVersion": "minio.min.io/v2", "kind": "Tenant",
                "metadata": {"name": "storage"}
            })))
            .unwrap());
    }

    #[test]
    fn test_pod() {
        let pod = |status: &str| {
            dynamic(json!({
                "apiVersion": "v1", "kind": "Pod",
                "metadata": {"name": "p"},
                "status": {"conditions": [{"type": "Ready", "status": status}]}
            }))
        };
        assert!(ReadinessCheck::Pod.is_ready(&pod("True")).unwrap());
        assert!(!ReadinessCheck::Pod.is_ready(&pod("False")).unwrap());
    }

    #[test]
    fn test_endpoints() {
        let check = ReadinessCheck::Endpoints {
            ports: vec!["http".to_string()],
        };
        let ready = dynamic(json!({
            "apiVersion": "v1", "kind": "Endpoints",
            "metadata": {"name": "redis"},
            "subsets": [{"addresses": [{"ip": "10.0.0.1"}], "ports": [{"name": "http", "port": 80}]}]
        }));
        assert!(check.is_ready(&ready).unwrap());

        let unready = dynamic(json!({
            "apiVersion": "v1", "kind": "Endpoints",
            "metadata": {"name": "redis"},
            "subsets": [{
                "addresses": [{"ip": "10.0.0.1"}],
                "notReadyAddresses": [{"ip": "10.0.0.2"}],
                "ports": [{"name": "http", "port": 80}]
            }]
        }));
        assert!(!check.is_ready(&unready).unwrap());

        let wrong_port = dynamic(json!({
            "apiVersion": "v1", "kind": "Endpoints",
            "metadata": {"name": "redis"},
            "subsets": [{"addresses": [{"ip": "10.0.0.1"}], "ports": [{"name": "metrics", "port": 9090}]}]
        }));
        assert!(!check.is_ready(&wrong_port).unwrap());
    }
}
