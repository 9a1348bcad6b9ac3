//! goharbor.io custom resources
//!
//! - [`v1beta1`] is the hub and storage version every reconciler works on
//! - [`v1alpha3`] is still served and converted through [`conversion`]
//! - [`defaults`] and [`validation`] back the admission webhook

pub mod common;
pub mod conversion;
pub mod defaults;
pub mod v1alpha3;
pub mod v1beta1;
pub mod validation;

use crate::error::{OperatorError, Result};
use crate::status::ComponentStatus;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceConversion, CustomResourceDefinition, ServiceReference, WebhookClientConfig,
    WebhookConversion,
};
use kube::core::crd::merge_crds;
use kube::core::ApiResource;
use kube::{CustomResourceExt, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Path the conversion endpoint is served at
pub const CONVERSION_PATH: &str = "/convert";

/// A goharbor.io kind the operator reconciles
pub trait Owner:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn status(&self) -> Option<&ComponentStatus>;
}

macro_rules! impl_owner {
    ($($kind:ty),* $(,)?) => {
        $(
            impl Owner for $kind {
                fn status(&self) -> Option<&ComponentStatus> {
                    self.status.as_ref()
                }
            }
        )*
    };
}

impl_owner!(
    v1beta1::Core,
    v1beta1::Registry,
    v1beta1::RegistryController,
    v1beta1::JobService,
    v1beta1::Portal,
    v1beta1::ChartMuseum,
    v1beta1::Trivy,
    v1beta1::NotaryServer,
    v1beta1::NotarySigner,
    v1beta1::Exporter,
    v1beta1::RobotAccount,
    v1beta1::Harbor,
    v1beta1::HarborCluster,
);

/// Hub API resources of every kind
pub fn api_resources() -> Vec<ApiResource> {
    vec![
        ApiResource::erase::<v1beta1::Core>(&()),
        ApiResource::erase::<v1beta1::Registry>(&()),
        ApiResource::erase::<v1beta1::RegistryController>(&()),
        ApiResource::erase::<v1beta1::JobService>(&()),
        ApiResource::erase::<v1beta1::Portal>(&()),
        ApiResource::erase::<v1beta1::ChartMuseum>(&()),
        ApiResource::erase::<v1beta1::Trivy>(&()),
        ApiResource::erase::<v1beta1::NotaryServer>(&()),
        ApiResource::erase::<v1beta1::NotarySigner>(&()),
        ApiResource::erase::<v1beta1::Exporter>(&()),
        ApiResource::erase::<v1beta1::RobotAccount>(&()),
        ApiResource::erase::<v1beta1::Harbor>(&()),
        ApiResource::erase::<v1beta1::HarborCluster>(&()),
    ]
}

/// Service the API server calls for conversion
#[derive(Debug, Clone)]
pub struct WebhookService {
    pub namespace: String,
    pub name: String,
    pub port: i32,
}

fn merged(
    versions: Vec<CustomResourceDefinition>,
    webhook: Option<&WebhookService>,
) -> Result<CustomResourceDefinition> {
    let mut crd = merge_crds(versions, "v1beta1")
        .map_err(|e| OperatorError::InvalidConfig(format!("cannot merge CRD versions: {}", e)))?;

    if let Some(webhook) = webhook {
        crd.spec.conversion = Some(CustomResourceConversion {
            strategy: "Webhook".to_string(),
            webhook: Some(WebhookConversion {
                client_config: Some(WebhookClientConfig {
                    service: Some(ServiceReference {
                        namespace: webhook.namespace.clone(),
                        name: webhook.name.clone(),
                        path: Some(CONVERSION_PATH.to_string()),
                        port: Some(webhook.port),
                    }),
                    ..Default::default()
                }),
                conversion_review_versions: vec!["v1".to_string()],
            }),
        });
    }

    Ok(crd)
}

/// CRDs of every kind, serving v1alpha3 and v1beta1 with v1beta1 stored
pub fn crds(webhook: Option<&WebhookService>) -> Result<Vec<CustomResourceDefinition>> {
    let pairs = vec![
        vec![v1beta1::Core::crd(), v1alpha3::Core::crd()],
        vec![v1beta1::Registry::crd(), v1alpha3::Registry::crd()],
        vec![
            v1beta1::RegistryController::crd(),
            v1alpha3::RegistryController::crd(),
        ],
        vec![v1beta1::JobService::crd(), v1alpha3::JobService::crd()],
        vec![v1beta1::Portal::crd(), v1alpha3::Portal::crd()],
        vec![v1beta1::ChartMuseum::crd(), v1alpha3::ChartMuseum::crd()],
        vec![v1beta1::Trivy::crd(), v1alpha3::Trivy::crd()],
        vec![v1beta1::NotaryServer::crd(), v1alpha3::NotaryServer::crd()],
        vec![v1beta1::NotarySigner::crd(), v1alpha3::NotarySigner::crd()],
        vec![v1beta1::Exporter::crd(), v1alpha3::Exporter::crd()],
        vec![v1beta1::RobotAccount::crd(), v1alpha3::RobotAccount::crd()],
        vec![v1beta1::Harbor::crd(), v1alpha3::Harbor::crd()],
        vec![v1beta1::HarborCluster::crd(), v1alpha3::HarborCluster::crd()],
    ];

    pairs
        .into_iter()
        .map(|versions| merged(versions, webhook))
        .collect()
}
