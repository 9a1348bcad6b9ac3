//! Conversion between served versions
//!
//! v1beta1 is the hub. Every converter moves an object between the hub and
//! one spoke version; a spoke to spoke request goes through the hub.

use super::defaults::{
    MINIO_OPERATOR_VERSION, REDIS_FAILOVER_OPERATOR_VERSION, ZLANDO_OPERATOR_VERSION,
};
use super::{v1alpha3, v1beta1};
use crate::error::{OperatorError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};

/// Moves objects of one kind between the hub and v1alpha3
pub trait KindConverter: Send + Sync {
    /// v1alpha3 to v1beta1
    fn to_hub(&self, object: Value) -> Result<Value>;

    /// v1beta1 to v1alpha3
    fn from_hub(&self, object: Value) -> Result<Value>;
}

/// Converter for kinds whose spec is identical in both versions.
///
/// The object is decoded as the source type so malformed objects are
/// rejected, then forwarded untouched apart from `apiVersion`.
pub struct Symmetric<Alpha, Beta> {
    _types: PhantomData<fn() -> (Alpha, Beta)>,
}

impl<Alpha, Beta> Symmetric<Alpha, Beta> {
    pub fn new() -> Self {
        Self {
            _types: PhantomData,
        }
    }
}

impl<Alpha, Beta> Default for Symmetric<Alpha, Beta> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Alpha, Beta> KindConverter for Symmetric<Alpha, Beta>
where
    Alpha: DeserializeOwned,
    Beta: DeserializeOwned,
{
    fn to_hub(&self, object: Value) -> Result<Value> {
        decode::<Alpha>(&object)?;
        Ok(with_api_version(object, v1beta1::API_VERSION))
    }

    fn from_hub(&self, object: Value) -> Result<Value> {
        decode::<Beta>(&object)?;
        Ok(with_api_version(object, v1alpha3::API_VERSION))
    }
}

/// Converter for HarborCluster, whose backends changed layout
pub struct HarborClusterConverter;

impl KindConverter for HarborClusterConverter {
    fn to_hub(&self, object: Value) -> Result<Value> {
        let source = decode::<v1alpha3::HarborCluster>(&object)?;
        encode(&harbor_cluster_to_hub(source)?)
    }

    fn from_hub(&self, object: Value) -> Result<Value> {
        let source = decode::<v1beta1::HarborCluster>(&object)?;
        encode(&harbor_cluster_from_hub(source)?)
    }
}

/// Converters keyed by kind
pub struct ConversionRegistry {
    converters: BTreeMap<&'static str, Arc<dyn KindConverter>>,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        Self {
            converters: BTreeMap::new(),
        }
    }

    pub fn register(mut self, kind: &'static str, converter: Arc<dyn KindConverter>) -> Self {
        self.converters.insert(kind, converter);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &&'static str> {
        self.converters.keys()
    }

    /// Convert one object to `desired` (`group/version`)
    pub fn convert(&self, object: Value, desired: &str) -> Result<Value> {
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| OperatorError::Conversion("object has no kind".to_string()))?
            .to_string();
        let current = object
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| OperatorError::Conversion(format!("{} has no apiVersion", kind)))?
            .to_string();

        if current == desired {
            return Ok(object);
        }

        let converter = self.converters.get(kind.as_str()).ok_or_else(|| {
            OperatorError::Conversion(format!("no conversion registered for kind {}", kind))
        })?;

        let hub = match current.as_str() {
            v1beta1::API_VERSION => object,
            v1alpha3::API_VERSION => converter.to_hub(object)?,
            other => {
                return Err(OperatorError::Conversion(format!(
                    "unsupported source version {} for {}",
                    other, kind
                )))
            }
        };

        match desired {
            v1beta1::API_VERSION => Ok(hub),
            v1alpha3::API_VERSION => converter.from_hub(hub),
            other => Err(OperatorError::Conversion(format!(
                "unsupported target version {} for {}",
                other, kind
            ))),
        }
    }

    /// Convert a batch, failing on the first object that cannot be converted
    pub fn convert_all(&self, objects: Vec<Value>, desired: &str) -> Result<Vec<Value>> {
        objects
            .into_iter()
            .map(|object| self.convert(object, desired))
            .collect()
    }
}

impl Default for ConversionRegistry {
    fn default() -> Self {
        Self::new()
            .register("Core", Arc::new(Symmetric::<v1alpha3::Core, v1beta1::Core>::new()))
            .register(
                "Registry",
                Arc::new(Symmetric::<v1alpha3::Registry, v1beta1::Registry>::new()),
            )
            .register(
                "RegistryController",
                Arc::new(Symmetric::<v1alpha3::RegistryController, v1beta1::RegistryController>::new()),
            )
            .register(
                "JobService",
                Arc::new(Symmetric::<v1alpha3::JobService, v1beta1::JobService>::new()),
            )
            .register("Portal", Arc::new(Symmetric::<v1alpha3::Portal, v1beta1::Portal>::new()))
            .register(
                "ChartMuseum",
                Arc::new(Symmetric::<v1alpha3::ChartMuseum, v1beta1::ChartMuseum>::new()),
            )
            .register("Trivy", Arc::new(Symmetric::<v1alpha3::Trivy, v1beta1::Trivy>::new()))
            .register(
                "NotaryServer",
                Arc::new(Symmetric::<v1alpha3::NotaryServer, v1beta1::NotaryServer>::new()),
            )
            .register(
                "NotarySigner",
                Arc::new(Symmetric::<v1alpha3::NotarySigner, v1beta1::NotarySigner>::new()),
            )
            .register(
                "Exporter",
                Arc::new(Symmetric::<v1alpha3::Exporter, v1beta1::Exporter>::new()),
            )
            .register(
                "RobotAccount",
                Arc::new(Symmetric::<v1alpha3::RobotAccount, v1beta1::RobotAccount>::new()),
            )
            .register("Harbor", Arc::new(Symmetric::<v1alpha3::Harbor, v1beta1::Harbor>::new()))
            .register("HarborCluster", Arc::new(HarborClusterConverter))
    }
}

static REGISTRY: LazyLock<ConversionRegistry> = LazyLock::new(ConversionRegistry::default);

/// Process-wide registry with every goharbor.io kind
pub fn registry() -> &'static ConversionRegistry {
    &REGISTRY
}

fn decode<T: DeserializeOwned>(object: &Value) -> Result<T> {
    serde_json::from_value(object.clone()).map_err(|e| OperatorError::Conversion(e.to_string()))
}

fn encode<T: Serialize>(object: &T) -> Result<Value> {
    serde_json::to_value(object).map_err(|e| OperatorError::Conversion(e.to_string()))
}

fn with_api_version(mut object: Value, api_version: &str) -> Value {
    if let Some(map) = object.as_object_mut() {
        map.insert("apiVersion".to_string(), Value::String(api_version.to_string()));
    }
    object
}

fn exclusive(field: &str, other: &str) -> OperatorError {
    OperatorError::Conversion(format!(
        "spec.{} and spec.{} cannot both be set",
        field, other
    ))
}

/// v1alpha3 HarborCluster to the hub
pub fn harbor_cluster_to_hub(source: v1alpha3::HarborCluster) -> Result<v1beta1::HarborCluster> {
    let spec = source.spec;

    let cache = match (spec.redis, spec.in_cluster_cache) {
        (Some(_), Some(_)) => return Err(exclusive("redis", "inClusterCache")),
        (Some(redis), None) => Some(v1beta1::Cache {
            kind: v1beta1::CACHE_KIND_REDIS.to_string(),
            spec: v1beta1::CacheSpec {
                redis: Some(redis),
                redis_failover: None,
            },
        }),
        (None, Some(in_cluster)) => {
            if in_cluster.provider != v1alpha3::PROVIDER_REDIS {
                return Err(OperatorError::Conversion(format!(
                    "unknown cache provider {}",
                    in_cluster.provider
                )));
            }
            Some(v1beta1::Cache {
                kind: v1beta1::CACHE_KIND_REDIS_FAILOVER.to_string(),
                spec: v1beta1::CacheSpec {
                    redis: None,
                    redis_failover: in_cluster.redis_spec.map(|redis| v1beta1::RedisFailoverSpec {
                        operator_version: Some(REDIS_FAILOVER_OPERATOR_VERSION.to_string()),
                        redis,
                    }),
                },
            })
        }
        (None, None) => None,
    };

    let database = match (spec.database, spec.in_cluster_database) {
        (Some(_), Some(_)) => return Err(exclusive("database", "inClusterDatabase")),
        (Some(postgres), None) => Some(v1beta1::Database {
            kind: v1beta1::DATABASE_KIND_POSTGRESQL.to_string(),
            spec: v1beta1::DatabaseSpec {
                postgres_sql: Some(postgres),
                zlando_postgre_sql: None,
            },
        }),
        (None, Some(in_cluster)) => {
            if in_cluster.provider != v1alpha3::PROVIDER_POSTGRESQL {
                return Err(OperatorError::Conversion(format!(
                    "unknown database provider {}",
                    in_cluster.provider
                )));
            }
            Some(v1beta1::Database {
                kind: v1beta1::DATABASE_KIND_ZLANDO_POSTGRESQL.to_string(),
                spec: v1beta1::DatabaseSpec {
                    postgres_sql: None,
                    zlando_postgre_sql: in_cluster.postgre_sql_spec.map(|postgres| {
                        v1beta1::ZlandoPostgresSpec {
                            operator_version: Some(ZLANDO_OPERATOR_VERSION.to_string()),
                            postgres,
                        }
                    }),
                },
            })
        }
        (None, None) => None,
    };

    let storage = match (spec.image_chart_storage, spec.in_cluster_storage) {
        (Some(_), Some(_)) => return Err(exclusive("imageChartStorage", "inClusterStorage")),
        (Some(driver), None) => Some(v1beta1::Storage {
            kind: v1beta1::storage_kind(&driver).to_string(),
            spec: v1beta1::StorageSpec {
                driver,
                minio: None,
            },
        }),
        (None, Some(in_cluster)) => {
            if in_cluster.provider != v1alpha3::PROVIDER_MINIO {
                return Err(OperatorError::Conversion(format!(
                    "unknown storage provider {}",
                    in_cluster.provider
                )));
            }
            Some(v1beta1::Storage {
                kind: v1beta1::STORAGE_KIND_MINIO.to_string(),
                spec: v1beta1::StorageSpec {
                    driver: Default::default(),
                    minio: in_cluster.minio_spec.map(|minio| v1beta1::MinioSpec {
                        operator_version: Some(MINIO_OPERATOR_VERSION.to_string()),
                        minio,
                    }),
                },
            })
        }
        (None, None) => None,
    };

    Ok(v1beta1::HarborCluster {
        metadata: source.metadata,
        spec: v1beta1::HarborClusterSpec {
            harbor: spec.harbor,
            cache,
            database,
            storage,
        },
        status: source.status,
    })
}

/// Hub HarborCluster to v1alpha3. Backend operator versions are dropped.
pub fn harbor_cluster_from_hub(source: v1beta1::HarborCluster) -> Result<v1alpha3::HarborCluster> {
    let spec = source.spec;
    let mut target = v1alpha3::HarborClusterSpec {
        harbor: spec.harbor,
        ..Default::default()
    };

    if let Some(cache) = spec.cache {
        match cache.kind.as_str() {
            v1beta1::CACHE_KIND_REDIS => {
                target.redis = Some(cache.spec.redis.ok_or_else(|| {
                    OperatorError::Conversion("spec.cache.spec.redis is required".to_string())
                })?);
            }
            v1beta1::CACHE_KIND_REDIS_FAILOVER => {
                target.in_cluster_cache = Some(v1alpha3::InClusterCacheSpec {
                    provider: v1alpha3::PROVIDER_REDIS.to_string(),
                    redis_spec: cache.spec.redis_failover.map(|failover| failover.redis),
                });
            }
            other => {
                return Err(OperatorError::Conversion(format!(
                    "unknown cache kind {}",
                    other
                )))
            }
        }
    }

    if let Some(database) = spec.database {
        match database.kind.as_str() {
            v1beta1::DATABASE_KIND_POSTGRESQL => {
                target.database = Some(database.spec.postgres_sql.ok_or_else(|| {
                    OperatorError::Conversion(
                        "spec.database.spec.postgresSql is required".to_string(),
                    )
                })?);
            }
            v1beta1::DATABASE_KIND_ZLANDO_POSTGRESQL => {
                target.in_cluster_database = Some(v1alpha3::InClusterDatabaseSpec {
                    provider: v1alpha3::PROVIDER_POSTGRESQL.to_string(),
                    postgre_sql_spec: database
                        .spec
                        .zlando_postgre_sql
                        .map(|zlando| zlando.postgres),
                });
            }
            other => {
                return Err(OperatorError::Conversion(format!(
                    "unknown database kind {}",
                    other
                )))
            }
        }
    }

    if let Some(storage) = spec.storage {
        if storage.kind == v1beta1::STORAGE_KIND_MINIO {
            target.in_cluster_storage = Some(v1alpha3::InClusterStorageSpec {
                provider: v1alpha3::PROVIDER_MINIO.to_string(),
                minio_spec: storage.spec.minio.map(|minio| minio.minio),
            });
        } else {
            target.image_chart_storage = Some(storage.spec.driver);
        }
    }

    Ok(v1alpha3::HarborCluster {
        metadata: source.metadata,
        spec: target,
        status: source.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alpha_cluster() -> Value {
        json!({
            "apiVersion": "goharbor.io/v1alpha3",
            "kind": "HarborCluster",
            "metadata": {"name": "sample", "namespace": "registry"},
            "spec": {
                "version": "2.5.0",
                "externalURL": "https://harbor.example.com",
                "logLevel": "info",
                "internalTls": {"enabled": false},
                "expose": {"core": {}},
                "inClusterCache": {
                    "provider": "RedisFailover",
                    "redisSpec": {"server": {"replicas": 1}, "sentinel": {"replicas": 3}}
                },
                "database": {"hosts": [{"host": "pg"}], "username": "harbor"},
                "inClusterStorage": {
                    "provider": "MinIO",
                    "minioSpec": {"replicas": 2, "volumesPerServer": 2}
                }
            }
        })
    }

    #[test]
    fn test_harbor_cluster_to_hub() {
        let hub = registry()
            .convert(alpha_cluster(), v1beta1::API_VERSION)
            .unwrap();
        assert_eq!(hub["apiVersion"], v1beta1::API_VERSION);
        assert_eq!(hub["spec"]["cache"]["kind"], "RedisFailover");
        assert_eq!(
            hub["spec"]["cache"]["spec"]["redisFailover"]["operatorVersion"],
            REDIS_FAILOVER_OPERATOR_VERSION
        );
        assert_eq!(hub["spec"]["cache"]["spec"]["redisFailover"]["sentinel"]["replicas"], 3);
        assert_eq!(hub["spec"]["database"]["kind"], "PostgreSQL");
        assert_eq!(hub["spec"]["storage"]["kind"], "MinIO");
        assert_eq!(hub["spec"]["storage"]["spec"]["minio"]["volumesPerServer"], 2);
        assert_eq!(hub["metadata"]["name"], "sample");
    }

    #[test]
    fn test_harbor_cluster_round_trip() {
        let original = alpha_cluster();
        let hub = registry()
            .convert(original.clone(), v1beta1::API_VERSION)
            .unwrap();
        let back = registry().convert(hub, v1alpha3::API_VERSION).unwrap();
        assert_eq!(back, original);
    }

    /// Re-encode through the hub type so optional fields take their wire form
    fn normalized_hub(hub: Value) -> Value {
        encode(&decode::<v1beta1::HarborCluster>(&hub).unwrap()).unwrap()
    }

    #[test]
    fn test_hub_round_trip() {
        let hub = normalized_hub(
            registry()
                .convert(alpha_cluster(), v1beta1::API_VERSION)
                .unwrap(),
        );
        let alpha = registry().convert(hub.clone(), v1alpha3::API_VERSION).unwrap();
        let back = registry().convert(alpha, v1beta1::API_VERSION).unwrap();
        assert_eq!(back, hub);
    }

    #[test]
    fn test_absent_backend_spec_stays_absent() {
        let mut original = alpha_cluster();
        original["spec"]["inClusterCache"]
            .as_object_mut()
            .unwrap()
            .remove("redisSpec");
        let hub = registry()
            .convert(original.clone(), v1beta1::API_VERSION)
            .unwrap();
        assert_eq!(hub["spec"]["cache"]["kind"], "RedisFailover");
        assert!(hub["spec"]["cache"]["spec"]
            .get("redisFailover")
            .map_or(true, Value::is_null));

        let back = registry().convert(hub.clone(), v1alpha3::API_VERSION).unwrap();
        assert_eq!(back, original);

        let hub = normalized_hub(hub);
        let alpha = registry().convert(hub.clone(), v1alpha3::API_VERSION).unwrap();
        assert_eq!(registry().convert(alpha, v1beta1::API_VERSION).unwrap(), hub);
    }

    #[test]
    fn test_operator_version_is_not_kept_on_spoke() {
        let mut hub = registry()
            .convert(alpha_cluster(), v1beta1::API_VERSION)
            .unwrap();
        hub["spec"]["cache"]["spec"]["redisFailover"]["operatorVersion"] = json!("0.9.0");
        let alpha = registry().convert(hub, v1alpha3::API_VERSION).unwrap();
        let hub = registry().convert(alpha, v1beta1::API_VERSION).unwrap();
        assert_eq!(
            hub["spec"]["cache"]["spec"]["redisFailover"]["operatorVersion"],
            REDIS_FAILOVER_OPERATOR_VERSION
        );
    }

    #[test]
    fn test_conflicting_pair_fails() {
        let mut object = alpha_cluster();
        object["spec"]["redis"] = json!({"host": "redis"});
        let err = registry()
            .convert(object, v1beta1::API_VERSION)
            .unwrap_err();
        assert!(err.to_string().contains("inClusterCache"));
    }

    #[test]
    fn test_symmetric_kind_only_changes_api_version() {
        let object = json!({
            "apiVersion": "goharbor.io/v1alpha3",
            "kind": "Portal",
            "metadata": {"name": "portal"},
            "spec": {"replicas": 2},
            "status": {"conditions": []}
        });
        let hub = registry()
            .convert(object.clone(), v1beta1::API_VERSION)
            .unwrap();
        let mut expected = object;
        expected["apiVersion"] = json!(v1beta1::API_VERSION);
        assert_eq!(hub, expected);
    }

    #[test]
    fn test_same_version_is_identity() {
        let object = alpha_cluster();
        let same = registry()
            .convert(object.clone(), v1alpha3::API_VERSION)
            .unwrap();
        assert_eq!(same, object);
    }

    #[test]
    fn test_unknown_kind_and_version() {
        let object = json!({"apiVersion": "goharbor.io/v1alpha3", "kind": "Unknown"});
        assert!(registry().convert(object, v1beta1::API_VERSION).is_err());

        let object = json!({"apiVersion": "goharbor.io/v1alpha2", "kind": "Portal", "spec": {}});
        assert!(registry().convert(object, v1beta1::API_VERSION).is_err());
    }

    #[test]
    fn test_every_kind_registered() {
        assert_eq!(registry().kinds().count(), 13);
    }
}
