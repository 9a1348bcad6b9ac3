//! Generic reconcile loop shared by every goharbor.io kind
//!
//! A [`Reconciler`] loads the owner, lets its [`Composer`] declare the
//! children, schedules the removal of children that are no longer
//! declared, runs the graph and maps the outcome onto the owner status.

pub mod manager;
pub mod sweep;

pub use manager::ResourceManager;

use crate::api::Owner;
use crate::cluster_client::ClusterClient;
use crate::config;
use crate::error::{OperatorError, Result, StatusCause, REASON_INVALID_SPEC};
use crate::graph::RunReport;
use crate::mutation::{OwnerInfo, ANNOTATION_HARBOR_CLASS};
use crate::status::{
    ComponentStatus, ConditionStatus, OperatorStatus, CONDITION_FAILED, CONDITION_IN_PROGRESS,
    REASON_NEW_GENERATION, REASON_READY,
};
use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Requeue interval once everything converged
pub const CONVERGED_REQUEUE: Duration = Duration::from_secs(300);

/// Owner a reconcile pass works on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    pub namespace: String,
    pub name: String,
}

impl ReconcileRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Result of a reconcile pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Every child is applied and ready
    Converged,
    /// Some child is not ready yet
    RequeueAfter(Duration),
    /// Unrecoverable until the owner changes
    Failed,
    /// Owner missing, being deleted or claimed by another class
    Skipped,
}

/// Declares the children of one owner kind
#[async_trait]
pub trait Composer<K: Owner>: Send + Sync {
    /// Insert every child of `owner` into the manager
    async fn add_resources(&self, owner: &K, manager: &mut ResourceManager) -> Result<()>;

    /// Kinds the sweep lists when looking for stale children
    fn owned_kinds(&self) -> Vec<ApiResource> {
        sweep::deletable_kinds()
    }

    /// Derive extra status from the outcome of the run
    fn finalize(&self, _owner: &K, _report: &RunReport, _status: &mut ComponentStatus) {}
}

/// Reconciles one owner kind through a composer
pub struct Reconciler<K: Owner> {
    client: Arc<dyn ClusterClient>,
    composer: Arc<dyn Composer<K>>,
    ar: ApiResource,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Owner> Reconciler<K> {
    pub fn new(client: Arc<dyn ClusterClient>, composer: Arc<dyn Composer<K>>) -> Self {
        Self {
            client,
            composer,
            ar: ApiResource::erase::<K>(&()),
            _kind: PhantomData,
        }
    }

    pub fn kind(&self) -> &str {
        &self.ar.kind
    }

    /// Run one pass over the named owner
    #[instrument(skip(self, cancel), fields(kind = %self.ar.kind, name = %request.name, namespace = %request.namespace))]
    pub async fn reconcile(
        &self,
        request: &ReconcileRequest,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let Some(object) = self
            .client
            .get(&self.ar, &request.namespace, &request.name)
            .await?
        else {
            debug!("Owner not found, nothing to do");
            return Ok(ReconcileOutcome::Skipped);
        };

        if object.metadata.deletion_timestamp.is_some() {
            debug!("Owner is being deleted, leaving children to the garbage collector");
            return Ok(ReconcileOutcome::Skipped);
        }

        let (harbor_class, requeue_after) =
            config::with(|c| (c.harbor_class.clone(), c.requeue_after()));
        if !matches_class(&object, &harbor_class) {
            debug!(class = %harbor_class, "Owner belongs to another harbor class");
            return Ok(ReconcileOutcome::Skipped);
        }

        let original = current_status(&object);
        let mut status = original.clone();
        prepare_status(&mut status, object.metadata.generation);

        let outcome = match self
            .compose_and_run(&object, &harbor_class, &mut status, cancel)
            .await
        {
            Ok(()) => {
                status.update_condition(
                    CONDITION_IN_PROGRESS,
                    ConditionStatus::False,
                    Some(REASON_READY),
                    None,
                );
                status.update_condition(
                    CONDITION_FAILED,
                    ConditionStatus::False,
                    Some(REASON_READY),
                    None,
                );
                info!("Reconciliation converged");
                ReconcileOutcome::Converged
            }
            Err(err) => match err.status_cause() {
                Some(StatusCause::RetryLater { reason, message }) => {
                    status.update_condition(
                        CONDITION_IN_PROGRESS,
                        ConditionStatus::True,
                        Some(&reason),
                        Some(&message),
                    );
                    status.update_condition(CONDITION_FAILED, ConditionStatus::False, None, None);
                    debug!(reason = %reason, message = %message, "Reconciliation in progress");
                    ReconcileOutcome::RequeueAfter(requeue_after)
                }
                Some(StatusCause::Unrecoverable { reason, message }) => {
                    status.update_condition(
                        CONDITION_IN_PROGRESS,
                        ConditionStatus::False,
                        None,
                        None,
                    );
                    status.update_condition(
                        CONDITION_FAILED,
                        ConditionStatus::True,
                        Some(&reason),
                        Some(&message),
                    );
                    warn!(reason = %reason, error = %err, "Reconciliation failed");
                    ReconcileOutcome::Failed
                }
                None => return Err(err),
            },
        };

        if status != original {
            debug!("Writing owner status");
            self.client
                .patch_status(
                    &self.ar,
                    &request.namespace,
                    &request.name,
                    &serde_json::to_value(&status)?,
                )
                .await?;
        }

        Ok(outcome)
    }

    async fn compose_and_run(
        &self,
        object: &DynamicObject,
        harbor_class: &str,
        status: &mut ComponentStatus,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let owner: K = serde_json::from_value(serde_json::to_value(object)?)
            .map_err(|e| OperatorError::fatal(REASON_INVALID_SPEC, e.to_string()))?;

        let mut manager =
            ResourceManager::new(self.client.clone(), owner_info(&self.ar, object)?, harbor_class);
        self.composer.add_resources(&owner, &mut manager).await?;

        let swept = sweep::schedule(&mut manager, &self.composer.owned_kinds()).await?;
        debug!(
            resources = manager.len(),
            swept = swept.len(),
            "Running resource graph"
        );

        let report = manager.run(cancel).await;
        self.composer.finalize(&owner, &report, status);
        report.into_result()
    }
}

/// Whether the owner is claimed by this operator's class
pub fn matches_class(object: &DynamicObject, harbor_class: &str) -> bool {
    let declared = object
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_HARBOR_CLASS))
        .map(String::as_str)
        .unwrap_or_default();
    declared == harbor_class
}

fn current_status(object: &DynamicObject) -> ComponentStatus {
    object
        .data
        .get("status")
        .and_then(|status| serde_json::from_value(status.clone()).ok())
        .unwrap_or_default()
}

/// Record the operator identity and flag a new generation
pub fn prepare_status(status: &mut ComponentStatus, generation: Option<i64>) {
    status.operator = OperatorStatus::current();
    if status.observed_generation != generation {
        status.observed_generation = generation;
        status.update_condition(
            CONDITION_IN_PROGRESS,
            ConditionStatus::True,
            Some(REASON_NEW_GENERATION),
            None,
        );
    }
}

fn owner_info(ar: &ApiResource, object: &DynamicObject) -> Result<OwnerInfo> {
    let missing = |field: &str| OperatorError::Internal(format!("owner is missing {}", field));
    Ok(OwnerInfo {
        api_version: ar.api_version.clone(),
        kind: ar.kind.clone(),
        name: object.metadata.name.clone().ok_or_else(|| missing("metadata.name"))?,
        namespace: object
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| missing("metadata.namespace"))?,
        uid: object.metadata.uid.clone().ok_or_else(|| missing("metadata.uid"))?,
        generation: object.metadata.generation.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1beta1::Portal;
    use crate::cluster_client::MemoryCluster;
    use crate::error::REASON_DEPENDENCY_STATUS;
    use k8s_openapi::api::core::v1::ConfigMap;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct StaticComposer {
        children: Vec<&'static str>,
        missing_secret: bool,
        fatal: bool,
    }

    #[async_trait]
    impl Composer<Portal> for StaticComposer {
        async fn add_resources(&self, owner: &Portal, manager: &mut ResourceManager) -> Result<()> {
            if self.fatal {
                return Err(OperatorError::fatal(REASON_INVALID_SPEC, "bad spec"));
            }
            let mut parents = Vec::new();
            if self.missing_secret {
                parents.push(manager.add_secret_dependency("absent")?);
            }
            for child in &self.children {
                let cm = ConfigMap {
                    metadata: kube::api::ObjectMeta {
                        name: Some(format!("{}-{}", owner.metadata.name.as_deref().unwrap_or_default(), child)),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
                    ..Default::default()
                };
                manager.add_config_map(&cm, &parents)?;
            }
            Ok(())
        }
    }

    fn portal_ar() -> ApiResource {
        ApiResource::erase::<Portal>(&())
    }

    fn seeded(annotations: serde_json::Value) -> Arc<MemoryCluster> {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert(
            &portal_ar(),
            serde_json::from_value(json!({
                "apiVersion": "goharbor.io/v1beta1",
                "kind": "Portal",
                "metadata": {"name": "sample", "namespace": "registry", "annotations": annotations},
                "spec": {}
            }))
            .unwrap(),
        );
        cluster
    }

    fn reconciler(cluster: Arc<MemoryCluster>, composer: StaticComposer) -> Reconciler<Portal> {
        Reconciler::new(cluster, Arc::new(composer))
    }

    fn stored_status(cluster: &MemoryCluster) -> ComponentStatus {
        current_status(&cluster.object(&portal_ar(), "registry", "sample").unwrap())
    }

    fn request() -> ReconcileRequest {
        ReconcileRequest::new("registry", "sample")
    }

    #[tokio::test]
    async fn test_converges_then_idle() {
        let cluster = seeded(json!({}));
        let reconciler = reconciler(
            cluster.clone(),
            StaticComposer {
                children: vec!["a", "b"],
                missing_secret: false,
                fatal: false,
            },
        );
        let cancel = CancellationToken::new();

        let outcome = reconciler.reconcile(&request(), &cancel).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Converged);
        let status = stored_status(&cluster);
        assert!(status.is_healthy(Some(1)));
        assert_eq!(status.operator, OperatorStatus::current());

        let writes = cluster.writes();
        let outcome = reconciler.reconcile(&request(), &cancel).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Converged);
        assert_eq!(cluster.writes(), writes);
    }

    #[tokio::test]
    async fn test_missing_dependency_requeues() {
        let cluster = seeded(json!({}));
        let reconciler = reconciler(
            cluster.clone(),
            StaticComposer {
                children: vec!["a"],
                missing_secret: true,
                fatal: false,
            },
        );

        let outcome = reconciler
            .reconcile(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::RequeueAfter(_)));
        let status = stored_status(&cluster);
        let in_progress = status.condition(CONDITION_IN_PROGRESS).unwrap();
        assert_eq!(in_progress.status, ConditionStatus::True);
        assert_eq!(in_progress.reason.as_deref(), Some(REASON_DEPENDENCY_STATUS));
        assert!(!status.is_true(CONDITION_FAILED));
    }

    #[tokio::test]
    async fn test_fatal_error_marks_failed() {
        let cluster = seeded(json!({}));
        let reconciler = reconciler(
            cluster.clone(),
            StaticComposer {
                children: vec![],
                missing_secret: false,
                fatal: true,
            },
        );

        let outcome = reconciler
            .reconcile(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Failed);
        let failed = stored_status(&cluster);
        let failed = failed.condition(CONDITION_FAILED).unwrap();
        assert_eq!(failed.status, ConditionStatus::True);
        assert_eq!(failed.reason.as_deref(), Some(REASON_INVALID_SPEC));
    }

    #[tokio::test]
    async fn test_removed_child_is_swept() {
        let cluster = seeded(json!({}));
        let cancel = CancellationToken::new();
        let full = reconciler(
            cluster.clone(),
            StaticComposer {
                children: vec!["a", "b"],
                missing_secret: false,
                fatal: false,
            },
        );
        full.reconcile(&request(), &cancel).await.unwrap();

        let reduced = reconciler(
            cluster.clone(),
            StaticComposer {
                children: vec!["a"],
                missing_secret: false,
                fatal: false,
            },
        );
        reduced.reconcile(&request(), &cancel).await.unwrap();

        let ar = ApiResource::erase::<ConfigMap>(&());
        assert!(cluster.object(&ar, "registry", "sample-a").is_some());
        assert!(cluster.object(&ar, "registry", "sample-b").is_none());
    }

    #[tokio::test]
    async fn test_other_class_and_missing_owner_skipped() {
        let cluster = seeded(json!({ANNOTATION_HARBOR_CLASS: "other"}));
        let reconciler = reconciler(
            cluster.clone(),
            StaticComposer {
                children: vec!["a"],
                missing_secret: false,
                fatal: false,
            },
        );
        let cancel = CancellationToken::new();

        let outcome = reconciler.reconcile(&request(), &cancel).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Skipped);
        assert_eq!(cluster.writes(), 0);

        let outcome = reconciler
            .reconcile(&ReconcileRequest::new("registry", "absent"), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Skipped);
    }

    #[test]
    fn test_prepare_status_flags_new_generation() {
        let mut status = ComponentStatus::default();
        prepare_status(&mut status, Some(3));
        assert_eq!(status.observed_generation, Some(3));
        let in_progress = status.condition(CONDITION_IN_PROGRESS).unwrap();
        assert_eq!(in_progress.reason.as_deref(), Some(REASON_NEW_GENERATION));

        let before = status.clone();
        prepare_status(&mut status, Some(3));
        assert_eq!(status, before);
    }
}
