//! Controllers for every goharbor.io kind
//!
//! Each kind gets its own kube-runtime `Controller` watching the owner and
//! the children it creates. The controller only translates events into
//! [`ReconcileRequest`]s; the protocol itself lives in [`Reconciler`].

use crate::api::v1beta1::*;
use crate::api::Owner;
use crate::cluster_client::{ClusterClient, KubeCluster};
use crate::composers::chartmuseum::ChartMuseumComposer;
use crate::composers::core::CoreComposer;
use crate::composers::exporter::ExporterComposer;
use crate::composers::harbor::HarborComposer;
use crate::composers::harbor_cluster::HarborClusterComposer;
use crate::composers::jobservice::JobServiceComposer;
use crate::composers::notary::{NotaryServerComposer, NotarySignerComposer};
use crate::composers::portal::PortalComposer;
use crate::composers::registry::RegistryComposer;
use crate::composers::registryctl::RegistryControllerComposer;
use crate::composers::robot::RobotAccountComposer;
use crate::composers::trivy::TrivyComposer;
use crate::config;
use crate::error::{OperatorError, Result};
use crate::reconciler::{Composer, ReconcileOutcome, ReconcileRequest, Reconciler};
use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Requeue interval for converged owners
const DEFAULT_REQUEUE_SECONDS: u64 = 300;

/// Maximum requeue delay for error backoff
const MAX_ERROR_REQUEUE_SECONDS: u64 = 600;

/// Context shared by the reconciles of one kind
pub struct ControllerContext<K: Owner> {
    pub reconciler: Reconciler<K>,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    /// Per-owner error retry counts for exponential backoff
    pub error_counts: DashMap<String, u32>,
    /// Cancelled on shutdown, aborts running graphs
    pub cancel: CancellationToken,
}

impl<K: Owner> ControllerContext<K> {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        composer: Arc<dyn Composer<K>>,
        cancel: CancellationToken,
    ) -> Self {
        let reconciler = Reconciler::new(client, composer);
        let metrics = ControllerMetrics::new(reconciler.kind());
        Self {
            reconciler,
            metrics: Some(metrics),
            error_counts: DashMap::new(),
            cancel,
        }
    }
}

/// Metrics for one controller, labelled by kind
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    pub fn new(kind: &str) -> Self {
        let kind = kind.to_string();
        Self {
            reconciliations: metrics::counter!("harbor_operator_reconciliations_total", "kind" => kind.clone()),
            errors: metrics::counter!("harbor_operator_reconciliation_errors_total", "kind" => kind.clone()),
            duration: metrics::histogram!("harbor_operator_reconciliation_duration_seconds", "kind" => kind),
        }
    }
}

fn owner_key<K: Resource>(owner: &K) -> String {
    format!(
        "{}/{}",
        owner.meta().namespace.as_deref().unwrap_or_default(),
        owner.meta().name.as_deref().unwrap_or_default()
    )
}

/// Api scoped to the watched namespace, or cluster wide
fn scoped<R>(client: &Client, namespace: Option<&str>) -> Api<R>
where
    R: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// What the work queue does after a reconcile
pub fn action_for(outcome: &ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::Converged => {
            Action::requeue(Duration::from_secs(DEFAULT_REQUEUE_SECONDS))
        }
        ReconcileOutcome::RequeueAfter(delay) => Action::requeue(*delay),
        ReconcileOutcome::Failed | ReconcileOutcome::Skipped => Action::await_change(),
    }
}

async fn reconcile<K: Owner>(owner: Arc<K>, ctx: Arc<ControllerContext<K>>) -> Result<Action> {
    let start = Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let request = ReconcileRequest::new(owner.namespace().unwrap_or_default(), owner.name_any());
    let result = ctx.reconciler.reconcile(&request, &ctx.cancel).await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    match result {
        Ok(outcome) => {
            // Reset error backoff counter on success
            ctx.error_counts.remove(&owner_key(owner.as_ref()));
            Ok(action_for(&outcome))
        }
        Err(e) => {
            if let Some(ref metrics) = ctx.metrics {
                metrics.errors.increment(1);
            }
            Err(e)
        }
    }
}

/// Backoff for errors the reconciler could not record on the owner
fn error_policy<K: Owner>(owner: Arc<K>, error: &OperatorError, ctx: Arc<ControllerContext<K>>) -> Action {
    match backoff(&ctx.error_counts, &owner_key(owner.as_ref()), error) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

/// Retryable errors double their suggested delay on every consecutive
/// failure, capped at 600s. Unrecoverable errors wait for an owner change.
fn backoff(error_counts: &DashMap<String, u32>, key: &str, error: &OperatorError) -> Option<Duration> {
    let Some(base) = error.requeue_delay() else {
        error_counts.remove(key);
        warn!(error = %error, "Unrecoverable error for '{}', waiting for a change", key);
        return None;
    };

    let retries = {
        let mut entry = error_counts.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    };

    let delay = (base * 2u32.saturating_pow((retries - 1).min(10)))
        .min(Duration::from_secs(MAX_ERROR_REQUEUE_SECONDS));

    warn!(
        error = %error,
        retry = retries,
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        key
    );
    Some(delay)
}

/// Run the controller of one kind until its watch stream ends
pub async fn run_controller<K>(
    client: Client,
    namespace: Option<String>,
    composer: Arc<dyn Composer<K>>,
    cancel: CancellationToken,
    watch_children: impl FnOnce(Controller<K>) -> Controller<K>,
) -> Result<()>
where
    K: Owner + Resource<Scope = NamespaceResourceScope> + DeserializeOwned + Debug,
{
    let owners: Api<K> = scoped(&client, namespace.as_deref());
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeCluster::new(client.clone()));
    let ctx = Arc::new(ControllerContext::new(cluster, composer, cancel));
    let kind = ctx.reconciler.kind().to_string();
    let concurrency = config::with(|c| c.max_concurrent_reconciles);

    info!(
        kind = %kind,
        namespace = namespace.as_deref().unwrap_or("all"),
        concurrency,
        "Starting controller"
    );

    let ns = namespace.as_deref();
    let controller = Controller::new(owners, Config::default())
        .with_config(controller::Config::default().concurrency(concurrency))
        .owns(scoped::<Deployment>(&client, ns), Config::default())
        .owns(scoped::<Service>(&client, ns), Config::default())
        .owns(scoped::<ConfigMap>(&client, ns), Config::default())
        .owns(scoped::<Secret>(&client, ns), Config::default());

    watch_children(controller)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    info!(kind = %kind, "Controller stopped");
    Ok(())
}

macro_rules! owns_components {
    ($controller:expr, $client:expr, $ns:expr, [$($kind:ty),* $(,)?]) => {
        $controller
            $(.owns(scoped::<$kind>($client, $ns), Config::default()))*
    };
}

/// Start one controller per goharbor.io kind and wait for all of them
pub async fn run_all(
    client: Client,
    namespace: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut controllers: JoinSet<Result<()>> = JoinSet::new();

    macro_rules! component {
        ($kind:ty, $composer:expr) => {
            controllers.spawn(run_controller::<$kind>(
                client.clone(),
                namespace.clone(),
                Arc::new($composer),
                cancel.clone(),
                |c| c,
            ))
        };
    }

    component!(Core, CoreComposer);
    component!(Portal, PortalComposer);
    component!(Registry, RegistryComposer);
    component!(RegistryController, RegistryControllerComposer);
    component!(JobService, JobServiceComposer);
    component!(ChartMuseum, ChartMuseumComposer);
    component!(Trivy, TrivyComposer);
    component!(NotaryServer, NotaryServerComposer);
    component!(NotarySigner, NotarySignerComposer);
    component!(Exporter, ExporterComposer);
    component!(RobotAccount, RobotAccountComposer);

    {
        let client = client.clone();
        let ns = namespace.clone();
        controllers.spawn(run_controller::<Harbor>(
            client.clone(),
            namespace.clone(),
            Arc::new(HarborComposer),
            cancel.clone(),
            move |c| {
                owns_components!(c, &client, ns.as_deref(), [
                    Core, Portal, Registry, RegistryController, JobService,
                    ChartMuseum, Trivy, NotaryServer, NotarySigner, Exporter,
                ])
            },
        ));
    }
    {
        let client = client.clone();
        let ns = namespace.clone();
        controllers.spawn(run_controller::<HarborCluster>(
            client.clone(),
            namespace.clone(),
            Arc::new(HarborClusterComposer),
            cancel.clone(),
            move |c| owns_components!(c, &client, ns.as_deref(), [Harbor]),
        ));
    }

    while let Some(joined) = controllers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                return Err(OperatorError::Internal(format!(
                    "controller task failed: {}",
                    e
                )))
            }
        }
    }
    Ok(())
}
