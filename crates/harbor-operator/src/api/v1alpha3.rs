//! goharbor.io/v1alpha3, the previous served version
//!
//! Most kinds did not change shape between versions and wrap the hub spec.
//! HarborCluster still declares its backends as flat pairs of an external
//! connection and an in-cluster provider.

use super::common::*;
use super::v1beta1;
use crate::status::ComponentStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const API_VERSION: &str = "goharbor.io/v1alpha3";

/// `inClusterCache.provider` for a spotahome RedisFailover
pub const PROVIDER_REDIS: &str = "RedisFailover";
/// `inClusterDatabase.provider` for a Zalando PostgreSQL
pub const PROVIDER_POSTGRESQL: &str = "PostgreSQL";
/// `inClusterStorage.provider` for a MinIO tenant
pub const PROVIDER_MINIO: &str = "MinIO";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "Core", plural = "cores", namespaced, status = "ComponentStatus")]
pub struct CoreSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::CoreSpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "Registry", plural = "registries", namespaced, status = "ComponentStatus")]
pub struct RegistrySpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::RegistrySpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1alpha3",
    kind = "RegistryController",
    plural = "registrycontrollers",
    namespaced,
    status = "ComponentStatus"
)]
pub struct RegistryControllerSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::RegistryControllerSpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "JobService", plural = "jobservices", namespaced, status = "ComponentStatus")]
pub struct JobServiceSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::JobServiceSpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "Portal", plural = "portals", namespaced, status = "ComponentStatus")]
pub struct PortalSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::PortalSpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "ChartMuseum", plural = "chartmuseums", namespaced, status = "ComponentStatus")]
pub struct ChartMuseumSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::ChartMuseumSpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "Trivy", plural = "trivies", namespaced, status = "ComponentStatus")]
pub struct TrivySpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::TrivySpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "NotaryServer", plural = "notaryservers", namespaced, status = "ComponentStatus")]
pub struct NotaryServerSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::NotaryServerSpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "NotarySigner", plural = "notarysigners", namespaced, status = "ComponentStatus")]
pub struct NotarySignerSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::NotarySignerSpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "Exporter", plural = "exporters", namespaced, status = "ComponentStatus")]
pub struct ExporterSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::ExporterSpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "RobotAccount", plural = "robotaccounts", namespaced, status = "ComponentStatus")]
pub struct RobotAccountSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::RobotAccountSpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(group = "goharbor.io", version = "v1alpha3", kind = "Harbor", plural = "harbors", namespaced, status = "ComponentStatus")]
pub struct HarborSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub inner: v1beta1::HarborSpec,
}

/// In-cluster Redis managed through a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InClusterCacheSpec {
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_spec: Option<v1beta1::InClusterRedisSpec>,
}

/// In-cluster PostgreSQL managed through a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InClusterDatabaseSpec {
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgre_sql_spec: Option<v1beta1::InClusterPostgresSpec>,
}

/// In-cluster object storage managed through a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InClusterStorageSpec {
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minio_spec: Option<v1beta1::InClusterMinioSpec>,
}

/// A complete Harbor with its backends, flat layout
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[kube(
    group = "goharbor.io",
    version = "v1alpha3",
    kind = "HarborCluster",
    plural = "harborclusters",
    namespaced,
    status = "ComponentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HarborClusterSpec {
    #[serde(flatten)]
    #[validate(nested)]
    pub harbor: v1beta1::EmbeddedHarborSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub redis: Option<RedisConnection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_cluster_cache: Option<InClusterCacheSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub database: Option<PostgresConnection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_cluster_database: Option<InClusterDatabaseSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub image_chart_storage: Option<StorageDriverSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_cluster_storage: Option<InClusterStorageSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_wrapped_spec_is_flat() {
        let spec = PortalSpec {
            inner: v1beta1::PortalSpec {
                component: ComponentSpec {
                    replicas: Some(2),
                    ..Default::default()
                },
                tls: None,
            },
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json, serde_json::json!({"replicas": 2}));
        assert_eq!(Portal::api_version(&()), API_VERSION);
    }

    #[test]
    fn test_flat_backends() {
        let spec: HarborClusterSpec = serde_json::from_value(serde_json::json!({
            "externalURL": "https://harbor.example.com",
            "inClusterCache": {"provider": "RedisFailover", "redisSpec": {"sentinel": {"replicas": 3}}},
            "database": {"hosts": [{"host": "pg"}]},
        }))
        .unwrap();
        assert_eq!(spec.in_cluster_cache.as_ref().unwrap().provider, PROVIDER_REDIS);
        assert!(spec.redis.is_none());
        assert_eq!(spec.database.unwrap().hosts[0].host, "pg");
    }
}
