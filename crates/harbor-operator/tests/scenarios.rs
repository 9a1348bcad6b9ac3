//! End-to-end reconcile scenarios against the in-memory cluster

use harbor_operator::api::validation::validate_object;
use harbor_operator::api::Owner;
use harbor_operator::api::v1beta1::{
    ChartMuseum, Core, Exporter, Harbor, HarborCluster, JobService, Portal, Registry,
    RegistryController,
};
use harbor_operator::cluster_client::MemoryCluster;
use harbor_operator::composers::core::CoreComposer;
use harbor_operator::composers::exporter::ExporterComposer;
use harbor_operator::composers::harbor::HarborComposer;
use harbor_operator::composers::harbor_cluster::HarborClusterComposer;
use harbor_operator::composers::jobservice::JobServiceComposer;
use harbor_operator::composers::portal::PortalComposer;
use harbor_operator::composers::registry::RegistryComposer;
use harbor_operator::composers::registryctl::RegistryControllerComposer;
use harbor_operator::error::REASON_INVALID_SPEC;
use harbor_operator::reconciler::{Composer, ReconcileOutcome, ReconcileRequest, Reconciler};
use harbor_operator::status::{
    ComponentStatus, ConditionStatus, CONDITION_CACHE_READY, CONDITION_FAILED,
    CONDITION_IN_PROGRESS, CONDITION_SERVICE_READY,
};
use harbor_operator::webhook;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::core::conversion::ConversionReview;
use kube::core::{ApiResource, DynamicObject};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "registry";

/// Cluster where deployments roll out, certificates issue and goharbor.io
/// children converge as soon as they are applied
fn settled_cluster() -> Arc<MemoryCluster> {
    Arc::new(MemoryCluster::new().with_hook(Box::new(|obj: &mut DynamicObject| {
        let (api_version, kind) = obj
            .types
            .as_ref()
            .map(|t| (t.api_version.clone(), t.kind.clone()))
            .unwrap_or_default();
        let generation = obj.metadata.generation.unwrap_or(1);
        match kind.as_str() {
            "Deployment" => {
                let replicas = obj.data["spec"]["replicas"].as_i64().unwrap_or(1);
                obj.data["status"] = json!({
                    "observedGeneration": generation,
                    "replicas": replicas,
                    "updatedReplicas": replicas,
                    "availableReplicas": replicas,
                    "readyReplicas": replicas,
                    "conditions": [
                        {"type": "Available", "status": "True"},
                        {"type": "Progressing", "status": "True", "reason": "NewReplicaSetAvailable"}
                    ]
                });
            }
            "Certificate" => {
                obj.data["status"] = json!({"conditions": [{"type": "Ready", "status": "True"}]});
            }
            _ if api_version.starts_with("goharbor.io/") => {
                obj.data["status"] = json!({"observedGeneration": generation, "conditions": []});
            }
            _ => {}
        }
    })))
}

fn insert(cluster: &MemoryCluster, ar: &ApiResource, object: Value) -> DynamicObject {
    cluster.insert(ar, serde_json::from_value(object).unwrap())
}

fn insert_password(cluster: &MemoryCluster, name: &str) {
    insert(
        cluster,
        &ApiResource::erase::<Secret>(&()),
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": name, "namespace": NAMESPACE},
            "stringData": {"password": "changeit"}
        }),
    );
}

fn status_of(cluster: &MemoryCluster, ar: &ApiResource, name: &str) -> ComponentStatus {
    cluster
        .object(ar, NAMESPACE, name)
        .and_then(|obj| obj.data.get("status").cloned())
        .map(|status| serde_json::from_value(status).unwrap())
        .unwrap_or_default()
}

fn template_annotations(cluster: &MemoryCluster, name: &str) -> Value {
    let deployment = cluster
        .object(&ApiResource::erase::<Deployment>(&()), NAMESPACE, name)
        .unwrap();
    deployment.data["spec"]["template"]["metadata"]["annotations"].clone()
}

fn harbor_spec() -> Value {
    json!({
        "version": "2.2.1",
        "externalURL": "https://harbor.example.com",
        "expose": {"core": {"ingress": {"host": "harbor.example.com"}}},
        "database": {"hosts": [{"host": "postgres"}], "username": "harbor", "passwordRef": "postgres-password"},
        "redis": {"host": "redis"},
        "imageChartStorage": {"fileSystem": {"claimName": "registry-data"}}
    })
}

#[tokio::test]
async fn test_portal_converges_then_stays_idle() {
    let cluster = settled_cluster();
    let ar = ApiResource::erase::<Portal>(&());
    let owner = insert(
        &cluster,
        &ar,
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "Portal",
            "metadata": {"name": "sample-portal", "namespace": NAMESPACE},
            "spec": {}
        }),
    );
    let reconciler = Reconciler::<Portal>::new(cluster.clone(), Arc::new(PortalComposer));
    let request = ReconcileRequest::new(NAMESPACE, "sample-portal");
    let cancel = CancellationToken::new();

    let outcome = reconciler.reconcile(&request, &cancel).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged);
    assert!(status_of(&cluster, &ar, "sample-portal").is_healthy(Some(1)));

    let deployment = cluster
        .object(&ApiResource::erase::<Deployment>(&()), NAMESPACE, "sample-portal")
        .unwrap();
    let owners = deployment.metadata.owner_references.unwrap_or_default();
    assert_eq!(owners.len(), 1);
    assert_eq!(Some(owners[0].uid.clone()), owner.metadata.uid);
    assert_eq!(owners[0].controller, Some(true));

    let writes = cluster.writes();
    let outcome = reconciler.reconcile(&request, &cancel).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged);
    assert_eq!(cluster.writes(), writes);
}

#[tokio::test]
async fn test_portal_waits_for_rollout() {
    let cluster = Arc::new(MemoryCluster::new());
    let ar = ApiResource::erase::<Portal>(&());
    insert(
        &cluster,
        &ar,
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "Portal",
            "metadata": {"name": "sample-portal", "namespace": NAMESPACE},
            "spec": {}
        }),
    );
    let reconciler = Reconciler::<Portal>::new(cluster.clone(), Arc::new(PortalComposer));

    let outcome = reconciler
        .reconcile(
            &ReconcileRequest::new(NAMESPACE, "sample-portal"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::RequeueAfter(_)));
    let status = status_of(&cluster, &ar, "sample-portal");
    assert!(status.is_true(CONDITION_IN_PROGRESS));
    assert!(!status.is_true(CONDITION_FAILED));
}

#[tokio::test]
async fn test_configuration_change_rolls_workload() {
    let cluster = settled_cluster();
    insert_password(&cluster, "postgres-password");
    let ar = ApiResource::erase::<Exporter>(&());
    insert(
        &cluster,
        &ar,
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "Exporter",
            "metadata": {"name": "sample-exporter", "namespace": NAMESPACE},
            "spec": {
                "logLevel": "info",
                "coreUrl": "http://sample-core",
                "database": {"hosts": [{"host": "postgres"}], "username": "harbor", "passwordRef": "postgres-password"}
            }
        }),
    );
    let reconciler = Reconciler::<Exporter>::new(cluster.clone(), Arc::new(ExporterComposer));
    let request = ReconcileRequest::new(NAMESPACE, "sample-exporter");
    let cancel = CancellationToken::new();

    assert_eq!(
        reconciler.reconcile(&request, &cancel).await.unwrap(),
        ReconcileOutcome::Converged
    );
    let before = template_annotations(&cluster, "sample-exporter");

    cluster.update(&ar, NAMESPACE, "sample-exporter", |obj| {
        obj.data["spec"]["logLevel"] = json!("debug");
    });
    assert_eq!(
        reconciler.reconcile(&request, &cancel).await.unwrap(),
        ReconcileOutcome::Converged
    );
    let after = template_annotations(&cluster, "sample-exporter");
    assert_ne!(before, after);
    assert!(status_of(&cluster, &ar, "sample-exporter").is_healthy(Some(2)));
}

fn insert_tls_secret(cluster: &MemoryCluster, name: &str) {
    insert(
        cluster,
        &ApiResource::erase::<Secret>(&()),
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "kubernetes.io/tls",
            "metadata": {"name": name, "namespace": NAMESPACE},
            "data": {"tls.crt": "Y2VydA==", "tls.key": "a2V5", "ca.crt": "Y2E="}
        }),
    );
}

fn generation(cluster: &MemoryCluster, ar: &ApiResource, name: &str) -> i64 {
    cluster
        .object(ar, NAMESPACE, name)
        .and_then(|obj| obj.metadata.generation)
        .unwrap_or_default()
}

async fn reconcile_once<K, C>(cluster: &Arc<MemoryCluster>, composer: C, name: &str) -> ReconcileOutcome
where
    K: Owner,
    C: Composer<K> + 'static,
{
    Reconciler::<K>::new(cluster.clone(), Arc::new(composer))
        .reconcile(&ReconcileRequest::new(NAMESPACE, name), &CancellationToken::new())
        .await
        .unwrap()
}

/// Run the controllers of every component a minimal Harbor declares
async fn reconcile_components(cluster: &Arc<MemoryCluster>) {
    let outcomes = [
        reconcile_once::<Registry, _>(cluster, RegistryComposer, "sample-registry").await,
        reconcile_once::<RegistryController, _>(cluster, RegistryControllerComposer, "sample-registryctl").await,
        reconcile_once::<Core, _>(cluster, CoreComposer, "sample-core").await,
        reconcile_once::<JobService, _>(cluster, JobServiceComposer, "sample-jobservice").await,
        reconcile_once::<Portal, _>(cluster, PortalComposer, "sample-portal").await,
    ];
    for outcome in outcomes {
        assert_eq!(outcome, ReconcileOutcome::Converged);
    }
}

fn snapshot(cluster: &MemoryCluster, ar: &ApiResource, name: &str) -> Value {
    let object = cluster
        .object(ar, NAMESPACE, name)
        .unwrap_or_else(|| panic!("{} {} missing", ar.kind, name));
    serde_json::to_value(object).unwrap()
}

#[tokio::test]
async fn test_minimal_harbor_then_external_url_change() {
    let cluster = settled_cluster();
    insert_password(&cluster, "postgres-password");
    insert_tls_secret(&cluster, "sample-token");
    let ar = ApiResource::erase::<Harbor>(&());
    let harbor = insert(
        &cluster,
        &ar,
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "Harbor",
            "metadata": {"name": "sample", "namespace": NAMESPACE},
            "spec": harbor_spec()
        }),
    );
    let reconciler = Reconciler::<Harbor>::new(cluster.clone(), Arc::new(HarborComposer));
    let request = ReconcileRequest::new(NAMESPACE, "sample");
    let cancel = CancellationToken::new();

    assert_eq!(
        reconciler.reconcile(&request, &cancel).await.unwrap(),
        ReconcileOutcome::Converged
    );
    let core_ar = ApiResource::erase::<Core>(&());
    let portal_ar = ApiResource::erase::<Portal>(&());
    for (child_ar, name) in [
        (ApiResource::erase::<Registry>(&()), "sample-registry"),
        (ApiResource::erase::<RegistryController>(&()), "sample-registryctl"),
        (core_ar.clone(), "sample-core"),
        (ApiResource::erase::<JobService>(&()), "sample-jobservice"),
        (portal_ar.clone(), "sample-portal"),
    ] {
        let child = cluster.object(&child_ar, NAMESPACE, name).unwrap();
        let owners = child.metadata.owner_references.unwrap_or_default();
        assert_eq!(owners.len(), 1, "{}", name);
        assert_eq!(Some(owners[0].uid.clone()), harbor.metadata.uid);
        assert_eq!(owners[0].controller, Some(true));
    }
    assert!(cluster
        .objects(&ApiResource::erase::<ChartMuseum>(&()), NAMESPACE)
        .is_empty());
    let status = status_of(&cluster, &ar, "sample");
    assert!(status.is_healthy(Some(1)));
    assert!(!status.is_true(CONDITION_FAILED));

    reconcile_components(&cluster).await;

    let deployment_ar = ApiResource::erase::<Deployment>(&());
    let untouched = [
        (ApiResource::erase::<Registry>(&()), "sample-registry"),
        (ApiResource::erase::<RegistryController>(&()), "sample-registryctl"),
        (ApiResource::erase::<JobService>(&()), "sample-jobservice"),
        (deployment_ar.clone(), "sample-registry"),
        (deployment_ar.clone(), "sample-registryctl"),
        (deployment_ar.clone(), "sample-jobservice"),
    ];
    let before: Vec<Value> = untouched
        .iter()
        .map(|(child_ar, name)| snapshot(&cluster, child_ar, name))
        .collect();
    let version_key = "sample-core.registry.core.goharbor.io/version";
    let core_version = template_annotations(&cluster, "sample-core")[version_key].clone();
    assert_eq!(core_version, "1");

    cluster.update(&ar, NAMESPACE, "sample", |obj| {
        obj.data["spec"]["externalURL"] = json!("https://registry.example.com");
    });
    assert_eq!(
        reconciler.reconcile(&request, &cancel).await.unwrap(),
        ReconcileOutcome::Converged
    );
    assert_eq!(generation(&cluster, &core_ar, "sample-core"), 2);
    assert_eq!(generation(&cluster, &portal_ar, "sample-portal"), 1);

    reconcile_components(&cluster).await;

    assert_eq!(
        template_annotations(&cluster, "sample-core")[version_key],
        "2"
    );
    for ((child_ar, name), before) in untouched.iter().zip(before) {
        assert_eq!(
            snapshot(&cluster, child_ar, name),
            before,
            "{} {} was rewritten",
            child_ar.kind,
            name
        );
    }
}

#[tokio::test]
async fn test_invalid_harbor_is_failed_without_children() {
    let cluster = settled_cluster();
    let ar = ApiResource::erase::<Harbor>(&());
    let mut spec = harbor_spec();
    spec["notary"] = json!({});
    insert(
        &cluster,
        &ar,
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "Harbor",
            "metadata": {"name": "sample", "namespace": NAMESPACE},
            "spec": spec
        }),
    );
    let reconciler = Reconciler::<Harbor>::new(cluster.clone(), Arc::new(HarborComposer));

    let outcome = reconciler
        .reconcile(&ReconcileRequest::new(NAMESPACE, "sample"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Failed);
    assert_eq!(cluster.applies(), 0);

    let status = status_of(&cluster, &ar, "sample");
    let failed = status.condition(CONDITION_FAILED).unwrap();
    assert_eq!(failed.status, ConditionStatus::True);
    assert_eq!(failed.reason.as_deref(), Some(REASON_INVALID_SPEC));
}

#[tokio::test]
async fn test_disabled_component_is_garbage_collected() {
    let cluster = settled_cluster();
    insert_password(&cluster, "postgres-password");
    let harbor = insert(
        &cluster,
        &ApiResource::erase::<Harbor>(&()),
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "Harbor",
            "metadata": {"name": "sample", "namespace": NAMESPACE},
            "spec": harbor_spec()
        }),
    );
    let chartmuseum_ar = ApiResource::erase::<ChartMuseum>(&());
    insert(
        &cluster,
        &chartmuseum_ar,
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "ChartMuseum",
            "metadata": {
                "name": "sample-chartmuseum",
                "namespace": NAMESPACE,
                "ownerReferences": [{
                    "apiVersion": "goharbor.io/v1beta1",
                    "kind": "Harbor",
                    "name": "sample",
                    "uid": harbor.metadata.uid,
                    "controller": true
                }]
            },
            "spec": {}
        }),
    );
    let unrelated = insert(
        &cluster,
        &chartmuseum_ar,
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "ChartMuseum",
            "metadata": {"name": "standalone", "namespace": NAMESPACE},
            "spec": {}
        }),
    );
    let reconciler = Reconciler::<Harbor>::new(cluster.clone(), Arc::new(HarborComposer));

    reconciler
        .reconcile(&ReconcileRequest::new(NAMESPACE, "sample"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(cluster
        .object(&chartmuseum_ar, NAMESPACE, "sample-chartmuseum")
        .is_none());
    assert!(cluster
        .object(&chartmuseum_ar, NAMESPACE, unrelated.metadata.name.as_deref().unwrap())
        .is_some());
}

#[tokio::test]
async fn test_harbor_cluster_with_external_backends() {
    let cluster = settled_cluster();
    insert_password(&cluster, "postgres-password");
    let ar = ApiResource::erase::<HarborCluster>(&());
    insert(
        &cluster,
        &ar,
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "HarborCluster",
            "metadata": {"name": "sample", "namespace": NAMESPACE},
            "spec": {
                "version": "2.5.0",
                "externalURL": "https://harbor.example.com",
                "expose": {"core": {"ingress": {"host": "harbor.example.com"}}},
                "cache": {"kind": "Redis", "spec": {"redis": {"host": "redis"}}},
                "database": {
                    "kind": "PostgreSQL",
                    "spec": {"postgresSql": {
                        "hosts": [{"host": "postgres"}],
                        "username": "harbor",
                        "passwordRef": "postgres-password"
                    }}
                },
                "storage": {
                    "kind": "FileSystem",
                    "spec": {"fileSystem": {"claimName": "registry-data"}}
                }
            }
        }),
    );
    let reconciler =
        Reconciler::<HarborCluster>::new(cluster.clone(), Arc::new(HarborClusterComposer));

    let outcome = reconciler
        .reconcile(&ReconcileRequest::new(NAMESPACE, "sample"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged);

    let harbor = cluster
        .object(&ApiResource::erase::<Harbor>(&()), NAMESPACE, "sample")
        .unwrap();
    assert_eq!(harbor.data["spec"]["redis"]["host"], "redis");
    assert_eq!(harbor.data["spec"]["imageChartStorage"]["fileSystem"]["claimName"], "registry-data");

    let status = status_of(&cluster, &ar, "sample");
    let cache = status.condition(CONDITION_CACHE_READY).unwrap();
    assert_eq!(cache.status, ConditionStatus::True);
    assert_eq!(cache.reason.as_deref(), Some("external"));
    assert!(status.is_true(CONDITION_SERVICE_READY));
}

#[test]
fn test_upgrade_gate_refuses_skipping_a_release() {
    let harbor = |version: &str| {
        let mut spec = harbor_spec();
        spec["version"] = json!(version);
        json!({
            "apiVersion": "goharbor.io/v1beta1",
            "kind": "Harbor",
            "metadata": {"name": "sample", "namespace": NAMESPACE},
            "spec": spec
        })
    };
    let version_rejected = |new: &str, old: &str| {
        validate_object(&harbor(new), Some(&harbor(old)))
            .iter()
            .any(|e| e.path == "spec.version")
    };

    assert!(version_rejected("2.4.0", "2.2.1"));
    assert!(version_rejected("2.2.1", "2.3.0"));
    assert!(!version_rejected("2.3.0", "2.2.1"));
    assert!(!version_rejected("2.2.1", "2.2.1"));
}

#[tokio::test]
async fn test_conversion_webhook_moves_backends_to_hub_layout() {
    let review: ConversionReview = serde_json::from_value(json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "ConversionReview",
        "request": {
            "uid": "conversion-uid",
            "desiredAPIVersion": "goharbor.io/v1beta1",
            "objects": [{
                "apiVersion": "goharbor.io/v1alpha3",
                "kind": "HarborCluster",
                "metadata": {"name": "sample", "namespace": NAMESPACE},
                "spec": {
                    "version": "2.5.0",
                    "externalURL": "https://harbor.example.com",
                    "expose": {"core": {}},
                    "redis": {"host": "redis"},
                    "database": {"hosts": [{"host": "pg"}], "username": "harbor"},
                    "inClusterStorage": {
                        "provider": "MinIO",
                        "minioSpec": {"replicas": 4, "volumesPerServer": 1}
                    }
                }
            }]
        }
    }))
    .unwrap();

    let axum::Json(review) = webhook::convert_handler(axum::Json(review)).await;
    let response = serde_json::to_value(&review).unwrap()["response"].clone();
    assert_eq!(response["result"]["status"], "Success");
    let converted = &response["convertedObjects"][0];
    assert_eq!(converted["apiVersion"], "goharbor.io/v1beta1");
    assert_eq!(converted["spec"]["cache"]["kind"], "Redis");
    assert_eq!(converted["spec"]["database"]["kind"], "PostgreSQL");
    assert_eq!(converted["spec"]["storage"]["kind"], "MinIO");
    assert_eq!(converted["spec"]["storage"]["spec"]["minio"]["replicas"], 4);
}
