//! # Harbor Kubernetes Operator
//!
//! Kubernetes operator deploying and supervising Harbor container registries.
//!
//! A user declares either a `HarborCluster` (Harbor plus its backends) or a
//! `Harbor` (Harbor on top of existing backends). The operator expands the
//! declaration into one custom resource per Harbor component, and each
//! component into Deployments, Services, ConfigMaps, Secrets, cert-manager
//! certificates and ingresses.
//!
//! ## Features
//!
//! - **Custom Resource Definitions**: `HarborCluster`, `Harbor`, one kind per
//!   component and `RobotAccount`, served as `v1alpha3` and `v1beta1`
//! - **Dependency-ordered reconciliation**: children form a graph; a child is
//!   written only once every resource it depends on is ready
//! - **Rolling on configuration change**: workloads carry a checksum of the
//!   ConfigMaps and Secrets they read
//! - **Generated credentials**: passwords, keys and htpasswd files written
//!   once as immutable secrets
//! - **Upgrade gate**: Harbor versions follow a supported version ladder
//! - **Admission webhooks**: validation, defaulting and version conversion
//! - **Observability**: Prometheus metrics labelled by kind, structured logs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use harbor_operator::prelude::*;
//! use kube::Client;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!     run_all(client, None, CancellationToken::new()).await
//! }
//! ```
//!
//! ## Architecture
//!
//! 1. **Watch**: one controller per kind watches owners and the children
//!    they own
//! 2. **Compose**: the kind's [`reconciler::Composer`] declares the desired
//!    children into a [`reconciler::ResourceManager`]
//! 3. **Run**: the [`graph`] applies children in dependency order and checks
//!    their readiness
//! 4. **Report**: the outcome becomes conditions on the owner status
//!
//! ## Modules
//!
//! - [`api`] - CRD types, defaulting, validation and conversion
//! - [`composers`] - desired children of every kind
//! - [`reconciler`] - generic reconcile loop and resource manager
//! - [`graph`] - dependency graph of child resources
//! - [`controller`] - controller wiring and metrics
//! - [`webhook`] - admission and conversion server
//! - [`cluster_client`] - API server access and the in-memory cluster
//! - [`error`] - error types and their status mapping
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: goharbor.io/v1beta1
//! kind: HarborCluster
//! metadata:
//!   name: sample
//! spec:
//!   version: "2.5.0"
//!   externalURL: https://harbor.example.com
//!   expose:
//!     core:
//!       ingress:
//!         host: harbor.example.com
//!   cache:
//!     kind: RedisFailover
//!     spec:
//!       redisFailover: {}
//!   database:
//!     kind: Zlando/PostgreSQL
//!     spec:
//!       zlandoPostgreSql: {}
//!   storage:
//!     kind: MinIO
//!     spec:
//!       minio:
//!         replicas: 4
//!         volumesPerServer: 1
//! ```

pub mod api;
pub mod certmanager;
pub mod checksum;
pub mod cluster_client;
pub mod composers;
pub mod config;
pub mod controller;
pub mod error;
pub mod graph;
pub mod images;
pub mod mutation;
pub mod readiness;
pub mod reconciler;
pub mod resources;
pub mod secrets;
pub mod status;
pub mod version;
pub mod webhook;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::api::v1beta1::{
        ChartMuseum, Core, Exporter, Harbor, HarborCluster, HarborClusterSpec, HarborSpec,
        JobService, NotaryServer, NotarySigner, Portal, Registry, RegistryController,
        RobotAccount, Trivy,
    };
    pub use crate::api::{crds, Owner, WebhookService};
    pub use crate::cluster_client::{ClusterClient, KubeCluster, MemoryCluster};
    pub use crate::config::OperatorConfig;
    pub use crate::controller::{run_all, run_controller, ControllerContext, ControllerMetrics};
    pub use crate::error::{OperatorError, Result};
    pub use crate::reconciler::{Composer, ReconcileOutcome, ReconcileRequest, Reconciler, ResourceManager};
    pub use crate::status::ComponentStatus;
    pub use crate::webhook::WebhookConfig;
}
