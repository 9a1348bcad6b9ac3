//! HarborCluster: a Harbor plus the backends it needs
//!
//! In-cluster backends are delegated to third-party operators through
//! their custom resources: spotahome `RedisFailover`, Zalando
//! `postgresql` and MinIO `Tenant`. The Harbor child is declared after
//! them and wired either to those backends or to the external
//! references of the spec.

use super::core::REDIS_PASSWORD_KEY;
use super::harbor::forwarded_annotations;
use crate::api::common::{
    PostgresConnection, PostgresHost, RedisConnection, S3Storage, StorageDriverSpec,
};
use crate::api::v1beta1::*;
use crate::api::validation;
use crate::config::{self, OPERATOR_NAME};
use crate::error::{OperatorError, Result, REASON_INVALID_SPEC};
use crate::graph::{NodeKey, RunReport};
use crate::readiness::ReadinessCheck;
use crate::reconciler::{sweep, Composer, ResourceManager};
use crate::resources::{typed_secret, LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_PART_OF, SECRET_TYPE_OPAQUE};
use crate::secrets;
use crate::status::{
    ComponentStatus, ConditionStatus, CONDITION_CACHE_READY, CONDITION_CONFIGURATION_READY,
    CONDITION_DATABASE_READY, CONDITION_SERVICE_READY, CONDITION_STORAGE_READY,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Resource;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

const REDIS_SENTINEL_PORT: i32 = 26379;
/// Port name of the sentinel service the RedisFailover operator creates
const REDIS_SENTINEL_PORT_NAME: &str = "sentinel";
const REDIS_MASTER_SET: &str = "mymaster";
const REDIS_REPLICAS: i32 = 3;
const POSTGRES_PORT: i32 = 5432;
const POSTGRES_USER: &str = "harbor";
const POSTGRES_DATABASE: &str = "registry";
const POSTGRES_INSTANCES: i32 = 1;
const POSTGRES_VERSION: &str = "13";
const MINIO_BUCKET: &str = "harbor";
const MINIO_REGION: &str = "us-east-1";
const DEFAULT_VOLUME_SIZE: &str = "1Gi";

/// Key of the password the RedisFailover operator configures
const REDIS_AUTH_KEY: &str = "password";
const MINIO_ACCESS_KEY: &str = "accesskey";
const MINIO_SECRET_KEY: &str = "secretkey";

const REASON_EXTERNAL: &str = "external";
const REASON_READY: &str = "ready";
const REASON_NOT_READY: &str = "notReady";

pub struct HarborClusterComposer;

pub fn redis_failover_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("databases.spotahome.com", "v1", "RedisFailover"))
}

pub fn postgresql_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("acid.zalan.do", "v1", "postgresql"))
}

pub fn tenant_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("minio.min.io", "v2", "Tenant"))
}

fn node_key(ar: &ApiResource, namespace: &str, name: &str) -> NodeKey {
    NodeKey::new(ar.api_version.clone(), ar.kind.clone(), namespace, name)
}

/// Names of the children of one HarborCluster
struct Names<'a> {
    name: &'a str,
    namespace: &'a str,
}

impl<'a> Names<'a> {
    fn of(cluster: &'a HarborCluster) -> Self {
        Names {
            name: cluster.metadata.name.as_deref().unwrap_or_default(),
            namespace: cluster.metadata.namespace.as_deref().unwrap_or_default(),
        }
    }

    fn redis(&self) -> String {
        format!("{}-redis", self.name)
    }

    /// Sentinel service the RedisFailover operator creates
    fn redis_sentinel(&self) -> String {
        format!("rfs-{}", self.redis())
    }

    /// Zalando requires the team id as the cluster name prefix
    fn postgres(&self) -> String {
        format!("{}-postgres", self.name)
    }

    /// Credentials secret the Zalando operator writes for a user
    fn postgres_credentials(&self) -> String {
        format!(
            "{}.{}.credentials.postgresql.acid.zalan.do",
            POSTGRES_USER,
            self.postgres()
        )
    }

    fn minio(&self) -> String {
        format!("{}-minio", self.name)
    }

    fn minio_endpoint(&self) -> String {
        format!("http://minio.{}.svc", self.namespace)
    }

    /// The failover reports no status; the cache is up once sentinels serve
    fn cache_key(&self, cluster: &HarborCluster) -> Option<NodeKey> {
        in_cluster_cache(cluster).then(|| {
            node_key(
                &ApiResource::erase::<Endpoints>(&()),
                self.namespace,
                &self.redis_sentinel(),
            )
        })
    }

    fn database_key(&self, cluster: &HarborCluster) -> Option<NodeKey> {
        in_cluster_database(cluster)
            .then(|| node_key(&postgresql_resource(), self.namespace, &self.postgres()))
    }

    fn storage_key(&self, cluster: &HarborCluster) -> Option<NodeKey> {
        in_cluster_storage(cluster)
            .then(|| node_key(&tenant_resource(), self.namespace, &self.minio()))
    }

    fn harbor_key(&self) -> NodeKey {
        node_key(&ApiResource::erase::<Harbor>(&()), self.namespace, self.name)
    }
}

fn in_cluster_cache(cluster: &HarborCluster) -> bool {
    cluster
        .spec
        .cache
        .as_ref()
        .is_some_and(|c| c.kind == CACHE_KIND_REDIS_FAILOVER)
}

fn in_cluster_database(cluster: &HarborCluster) -> bool {
    cluster
        .spec
        .database
        .as_ref()
        .is_some_and(|d| d.kind == DATABASE_KIND_ZLANDO_POSTGRESQL)
}

fn in_cluster_storage(cluster: &HarborCluster) -> bool {
    cluster
        .spec
        .storage
        .as_ref()
        .is_some_and(|s| s.kind == STORAGE_KIND_MINIO)
}

fn labels(names: &Names<'_>) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (LABEL_PART_OF.to_string(), "harbor".to_string()),
        (LABEL_INSTANCE.to_string(), names.name.to_string()),
    ])
}

fn meta(names: &Names<'_>, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(names.namespace.to_string()),
        labels: Some(labels(names)),
        ..Default::default()
    }
}

fn third_party(ar: &ApiResource, names: &Names<'_>, name: &str, spec: Value) -> DynamicObject {
    let mut obj = DynamicObject::new(name, ar)
        .within(names.namespace)
        .data(json!({ "spec": spec }));
    obj.metadata.labels = Some(labels(names));
    obj
}

fn volume_claim(volume: Option<&VolumeSpec>) -> Value {
    let size = volume
        .map(|v| v.size.as_str())
        .filter(|size| !size.is_empty())
        .unwrap_or(DEFAULT_VOLUME_SIZE);
    let mut claim = json!({
        "accessModes": ["ReadWriteOnce"],
        "resources": {"requests": {"storage": size}}
    });
    if let Some(class) = volume.and_then(|v| v.storage_class_name.as_deref()) {
        claim["storageClassName"] = json!(class);
    }
    claim
}

fn password_budget() -> config::PasswordBudget {
    config::with(|c| c.password_budget)
}

/// RedisFailover spec for the in-cluster cache
fn redis_failover_spec(redis: &InClusterRedisSpec, secret: &str) -> Value {
    let server = redis.server.clone().unwrap_or_default();
    let mut spec = json!({
        "sentinel": {
            "replicas": redis
                .sentinel
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or(REDIS_REPLICAS)
        },
        "redis": {
            "replicas": server.replicas.unwrap_or(REDIS_REPLICAS)
        },
        "auth": {"secretPath": secret}
    });
    if let Some(storage) = &server.storage {
        spec["redis"]["storage"] = json!({
            "keepAfterDeletion": true,
            "persistentVolumeClaim": {
                "metadata": {"name": "data"},
                "spec": volume_claim(Some(storage))
            }
        });
    }
    if let Some(image) = &redis.image {
        spec["redis"]["image"] = json!(image);
    }
    spec
}

async fn add_cache(
    manager: &mut ResourceManager,
    cluster: &HarborCluster,
    names: &Names<'_>,
) -> Result<(RedisConnection, Vec<NodeKey>)> {
    let Some(cache) = &cluster.spec.cache else {
        return Err(OperatorError::fatal(REASON_INVALID_SPEC, "a cache is required"));
    };
    if !in_cluster_cache(cluster) {
        let redis = cache.spec.redis.clone().unwrap_or_default();
        let parents = match redis.password_ref.as_deref() {
            Some(secret) => vec![manager.add_secret_dependency(secret)?],
            None => Vec::new(),
        };
        return Ok((redis, parents));
    }

    let name = names.redis();
    let password = manager
        .secret_value_or(&name, REDIS_AUTH_KEY, || secrets::generate(password_budget()))
        .await?;
    let secret = typed_secret(
        meta(names, name.clone()),
        SECRET_TYPE_OPAQUE,
        BTreeMap::from([
            (REDIS_AUTH_KEY.to_string(), password.clone()),
            (REDIS_PASSWORD_KEY.to_string(), password),
        ]),
    );
    let secret_key = manager.add_immutable_secret(&secret, &[])?;

    let failover = cache.spec.redis_failover.clone().unwrap_or_default();
    let ar = redis_failover_resource();
    let desired = third_party(&ar, names, &name, redis_failover_spec(&failover.redis, &name));
    let failover_key = manager.add_unstructured(
        ar,
        desired,
        std::slice::from_ref(&secret_key),
        None,
        ReadinessCheck::Always,
    )?;
    let sentinel_key = manager.add_external(
        ApiResource::erase::<Endpoints>(&()),
        &names.redis_sentinel(),
        ReadinessCheck::Endpoints {
            ports: vec![REDIS_SENTINEL_PORT_NAME.to_string()],
        },
        &[failover_key],
    )?;

    Ok((
        RedisConnection {
            host: names.redis_sentinel(),
            port: Some(REDIS_SENTINEL_PORT),
            password_ref: Some(name),
            sentinel_master_set: Some(REDIS_MASTER_SET.to_string()),
        },
        vec![secret_key, sentinel_key],
    ))
}

/// Zalando postgresql spec with the databases Harbor connects to
fn postgresql_spec(team: &str, postgres: &InClusterPostgresSpec) -> Value {
    let claim = volume_claim(postgres.storage.as_ref());
    let mut volume = json!({ "size": claim["resources"]["requests"]["storage"] });
    if let Some(class) = claim.get("storageClassName") {
        volume["storageClass"] = class.clone();
    }
    json!({
        "teamId": team,
        "numberOfInstances": postgres.replicas.unwrap_or(POSTGRES_INSTANCES),
        "volume": volume,
        "postgresql": {
            "version": postgres.version.clone().unwrap_or_else(|| POSTGRES_VERSION.to_string())
        },
        "users": {
            POSTGRES_USER: ["superuser", "createdb"]
        },
        "databases": {
            POSTGRES_DATABASE: POSTGRES_USER,
            "notaryserver": POSTGRES_USER,
            "notarysigner": POSTGRES_USER
        }
    })
}

fn add_database(
    manager: &mut ResourceManager,
    cluster: &HarborCluster,
    names: &Names<'_>,
) -> Result<(PostgresConnection, Vec<NodeKey>)> {
    let Some(database) = &cluster.spec.database else {
        return Err(OperatorError::fatal(REASON_INVALID_SPEC, "a database is required"));
    };
    if !in_cluster_database(cluster) {
        let connection = database.spec.postgres_sql.clone().unwrap_or_default();
        let parents = match connection.password_ref.as_deref() {
            Some(secret) => vec![manager.add_secret_dependency(secret)?],
            None => Vec::new(),
        };
        return Ok((connection, parents));
    }

    let zalando = database.spec.zlando_postgre_sql.clone().unwrap_or_default();
    let ar = postgresql_resource();
    let name = names.postgres();
    let desired = third_party(&ar, names, &name, postgresql_spec(names.name, &zalando.postgres));
    let postgres_key = manager.add_unstructured(
        ar,
        desired,
        &[],
        None,
        ReadinessCheck::StatusField {
            field: "PostgresClusterStatus".to_string(),
            expected: "Running".to_string(),
        },
    )?;
    // written by the Zalando operator once the cluster exists
    let credentials = names.postgres_credentials();
    let credentials_key = manager.add_secret_dependency(&credentials)?;

    Ok((
        PostgresConnection {
            hosts: vec![PostgresHost {
                host: name,
                port: Some(POSTGRES_PORT),
            }],
            username: POSTGRES_USER.to_string(),
            password_ref: Some(credentials),
            database: None,
            ssl_mode: Some("require".to_string()),
        },
        vec![postgres_key, credentials_key],
    ))
}

/// MinIO Tenant spec with a single pool
fn tenant_spec(minio: &InClusterMinioSpec, credentials: &str) -> Value {
    json!({
        "pools": [{
            "name": "pool-0",
            "servers": minio.replicas,
            "volumesPerServer": minio.volumes_per_server,
            "volumeClaimTemplate": {
                "metadata": {"name": "data"},
                "spec": volume_claim(minio.volume.as_ref())
            }
        }],
        "credsSecret": {"name": credentials},
        "requestAutoCert": false,
        "buckets": [{"name": MINIO_BUCKET, "region": MINIO_REGION}]
    })
}

async fn add_storage(
    manager: &mut ResourceManager,
    cluster: &HarborCluster,
    names: &Names<'_>,
) -> Result<(StorageDriverSpec, Vec<NodeKey>)> {
    let Some(storage) = &cluster.spec.storage else {
        return Err(OperatorError::fatal(REASON_INVALID_SPEC, "a storage is required"));
    };
    if !in_cluster_storage(cluster) {
        let driver = storage.spec.driver.clone();
        let parents = super::add_secret_refs(manager, &[super::storage_credentials(&driver)])?;
        return Ok((driver, parents));
    }

    let name = names.minio();
    let budget = password_budget();
    let access_key = manager
        .secret_value_or(&name, MINIO_ACCESS_KEY, || {
            secrets::generate(config::PasswordBudget::new(budget.length, budget.digits, 0))
        })
        .await?;
    let secret_key = manager
        .secret_value_or(&name, MINIO_SECRET_KEY, || secrets::generate(budget))
        .await?;
    let secret = typed_secret(
        meta(names, name.clone()),
        SECRET_TYPE_OPAQUE,
        BTreeMap::from([
            (MINIO_ACCESS_KEY.to_string(), access_key),
            (MINIO_SECRET_KEY.to_string(), secret_key),
        ]),
    );
    let credentials_key = manager.add_immutable_secret(&secret, &[])?;

    let minio = storage.spec.minio.clone().unwrap_or_default();
    let ar = tenant_resource();
    let desired = third_party(&ar, names, &name, tenant_spec(&minio.minio, &name));
    let tenant_key = manager.add_unstructured(
        ar,
        desired,
        std::slice::from_ref(&credentials_key),
        None,
        ReadinessCheck::StatusField {
            field: "currentState".to_string(),
            expected: "Initialized".to_string(),
        },
    )?;

    Ok((
        StorageDriverSpec {
            s3: Some(S3Storage {
                bucket: MINIO_BUCKET.to_string(),
                region: MINIO_REGION.to_string(),
                region_endpoint: Some(names.minio_endpoint()),
                credentials_ref: Some(name),
                root_directory: None,
                secure: Some(false),
            }),
            ..Default::default()
        },
        vec![credentials_key, tenant_key],
    ))
}

#[async_trait]
impl Composer<HarborCluster> for HarborClusterComposer {
    async fn add_resources(
        &self,
        cluster: &HarborCluster,
        manager: &mut ResourceManager,
    ) -> Result<()> {
        let errors = validation::harbor_cluster_errors(&cluster.spec);
        if !errors.is_empty() {
            return Err(OperatorError::fatal(
                REASON_INVALID_SPEC,
                validation::summarize(&errors),
            ));
        }

        let names = Names::of(cluster);
        let (redis, mut parents) = add_cache(manager, cluster, &names).await?;
        let (database, database_parents) = add_database(manager, cluster, &names)?;
        parents.extend(database_parents);
        let (storage, storage_parents) = add_storage(manager, cluster, &names).await?;
        parents.extend(storage_parents);

        let mut metadata = meta(&names, names.name.to_string());
        let annotations = forwarded_annotations(cluster.meta());
        if !annotations.is_empty() {
            metadata.annotations = Some(annotations);
        }
        let harbor = Harbor {
            metadata,
            spec: HarborSpec {
                harbor: cluster.spec.harbor.clone(),
                database,
                redis,
                image_chart_storage: storage,
            },
            status: None,
        };
        manager.add_component(&harbor, &parents)?;
        debug!(backends = parents.len(), "harbor cluster composed");
        Ok(())
    }

    fn owned_kinds(&self) -> Vec<ApiResource> {
        let mut kinds = sweep::deletable_kinds();
        kinds.extend([redis_failover_resource(), postgresql_resource(), tenant_resource()]);
        kinds
    }

    fn finalize(&self, cluster: &HarborCluster, report: &RunReport, status: &mut ComponentStatus) {
        let names = Names::of(cluster);
        let backend = |key: Option<NodeKey>| match key {
            None => (ConditionStatus::True, REASON_EXTERNAL),
            Some(key) if report.succeeded(&key) => (ConditionStatus::True, REASON_READY),
            Some(_) => (ConditionStatus::False, REASON_NOT_READY),
        };

        for (condition, (value, reason)) in [
            (CONDITION_CACHE_READY, backend(names.cache_key(cluster))),
            (CONDITION_DATABASE_READY, backend(names.database_key(cluster))),
            (CONDITION_STORAGE_READY, backend(names.storage_key(cluster))),
            (CONDITION_SERVICE_READY, backend(Some(names.harbor_key()))),
        ] {
            status.update_condition(condition, value, Some(reason), None);
        }
        // composing only succeeds on a valid spec
        status.update_condition(
            CONDITION_CONFIGURATION_READY,
            ConditionStatus::True,
            Some(REASON_READY),
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::common::FileSystemStorage;
    use crate::composers::testing::{declares, manager_for};
    use crate::graph::NodeResult;
    use std::sync::Arc;

    fn cluster() -> HarborCluster {
        let mut cluster = HarborCluster::new(
            "sample",
            HarborClusterSpec {
                harbor: EmbeddedHarborSpec {
                    version: crate::version::default_version(),
                    external_url: "https://harbor.example.com".into(),
                    log_level: "info".into(),
                    ..Default::default()
                },
                cache: Some(Cache {
                    kind: CACHE_KIND_REDIS.into(),
                    spec: CacheSpec {
                        redis: Some(RedisConnection {
                            host: "redis".into(),
                            ..Default::default()
                        }),
                        redis_failover: None,
                    },
                }),
                database: Some(Database {
                    kind: DATABASE_KIND_POSTGRESQL.into(),
                    spec: DatabaseSpec {
                        postgres_sql: Some(PostgresConnection {
                            hosts: vec![PostgresHost {
                                host: "postgres".into(),
                                port: None,
                            }],
                            username: "harbor".into(),
                            password_ref: Some("postgres-password".into()),
                            ..Default::default()
                        }),
                        zlando_postgre_sql: None,
                    },
                }),
                storage: Some(Storage {
                    kind: STORAGE_KIND_FILESYSTEM.into(),
                    spec: StorageSpec {
                        driver: StorageDriverSpec {
                            file_system: Some(FileSystemStorage {
                                claim_name: "registry-data".into(),
                                sub_path: None,
                            }),
                            ..Default::default()
                        },
                        minio: None,
                    },
                }),
            },
        );
        cluster.metadata.namespace = Some("registry".into());
        cluster
    }

    fn in_cluster() -> HarborCluster {
        let mut cluster = cluster();
        cluster.spec.cache = Some(Cache {
            kind: CACHE_KIND_REDIS_FAILOVER.into(),
            spec: CacheSpec {
                redis: None,
                redis_failover: Some(RedisFailoverSpec::default()),
            },
        });
        cluster.spec.database = Some(Database {
            kind: DATABASE_KIND_ZLANDO_POSTGRESQL.into(),
            spec: DatabaseSpec {
                postgres_sql: None,
                zlando_postgre_sql: Some(ZlandoPostgresSpec::default()),
            },
        });
        cluster.spec.storage = Some(Storage {
            kind: STORAGE_KIND_MINIO.into(),
            spec: StorageSpec {
                driver: StorageDriverSpec::default(),
                minio: Some(MinioSpec {
                    operator_version: None,
                    minio: InClusterMinioSpec {
                        replicas: 2,
                        volumes_per_server: 2,
                        volume: None,
                    },
                }),
            },
        });
        cluster
    }

    #[tokio::test]
    async fn test_external_backends() {
        let cluster = cluster();
        let mut manager = manager_for(&cluster);
        HarborClusterComposer
            .add_resources(&cluster, &mut manager)
            .await
            .unwrap();

        assert!(declares(&manager, "Harbor", "sample"));
        assert!(declares(&manager, "Secret", "postgres-password"));
        assert!(!declares(&manager, "RedisFailover", "sample-redis"));
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_in_cluster_backends() {
        let cluster = in_cluster();
        let mut manager = manager_for(&cluster);
        HarborClusterComposer
            .add_resources(&cluster, &mut manager)
            .await
            .unwrap();

        assert!(declares(&manager, "RedisFailover", "sample-redis"));
        assert!(declares(&manager, "Secret", "sample-redis"));
        assert!(declares(&manager, "postgresql", "sample-postgres"));
        assert!(declares(
            &manager,
            "Secret",
            "harbor.sample-postgres.credentials.postgresql.acid.zalan.do"
        ));
        assert!(declares(&manager, "Tenant", "sample-minio"));
        assert!(declares(&manager, "Secret", "sample-minio"));

        let harbor = Names::of(&cluster).harbor_key();
        let parents = manager.parents(&harbor);
        assert!(parents
            .iter()
            .any(|p| p.kind == "Endpoints" && p.name == "rfs-sample-redis"));
        assert!(parents.iter().any(|p| p.kind == "Tenant"));
    }

    #[tokio::test]
    async fn test_missing_backend_is_fatal() {
        let mut cluster = cluster();
        cluster.spec.cache = None;
        let mut manager = manager_for(&cluster);
        let err = HarborClusterComposer
            .add_resources(&cluster, &mut manager)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_redis_failover_spec() {
        let spec = redis_failover_spec(
            &InClusterRedisSpec {
                server: Some(RedisServerSpec {
                    replicas: Some(1),
                    storage: Some(VolumeSpec {
                        size: "5Gi".into(),
                        storage_class_name: Some("fast".into()),
                    }),
                }),
                sentinel: None,
                image: None,
            },
            "sample-redis",
        );
        assert_eq!(spec["redis"]["replicas"], 1);
        assert_eq!(spec["sentinel"]["replicas"], 3);
        assert_eq!(spec["auth"]["secretPath"], "sample-redis");
        let claim = &spec["redis"]["storage"]["persistentVolumeClaim"]["spec"];
        assert_eq!(claim["resources"]["requests"]["storage"], "5Gi");
        assert_eq!(claim["storageClassName"], "fast");
    }

    #[tokio::test]
    async fn test_cache_waits_for_sentinels() {
        let cluster = in_cluster();
        let names = Names::of(&cluster);
        let mut manager = manager_for(&cluster);
        HarborClusterComposer
            .add_resources(&cluster, &mut manager)
            .await
            .unwrap();

        let report = manager.run(&tokio_util::sync::CancellationToken::new()).await;
        let failover = node_key(&redis_failover_resource(), names.namespace, &names.redis());
        // written without a status, the failover alone says nothing about readiness
        assert!(report.succeeded(&failover));
        assert!(!report.succeeded(&names.cache_key(&cluster).unwrap()));
        assert!(!report.succeeded(&names.harbor_key()));

        let mut status = ComponentStatus::default();
        HarborClusterComposer.finalize(&cluster, &report, &mut status);
        assert!(!status.is_true(CONDITION_CACHE_READY));
    }

    #[test]
    fn test_finalize_conditions() {
        let cluster = in_cluster();
        let names = Names::of(&cluster);
        let failed: NodeResult = Err(Arc::new(OperatorError::not_ready("tenant provisioning")));
        let report = RunReport {
            outcomes: BTreeMap::from([
                (names.cache_key(&cluster).unwrap(), Ok(())),
                (names.database_key(&cluster).unwrap(), Ok(())),
                (names.storage_key(&cluster).unwrap(), failed.clone()),
                (names.harbor_key(), failed),
            ]),
            first_error: None,
        };

        let mut status = ComponentStatus::default();
        HarborClusterComposer.finalize(&cluster, &report, &mut status);
        assert!(status.is_true(CONDITION_CACHE_READY));
        assert!(status.is_true(CONDITION_DATABASE_READY));
        assert!(!status.is_true(CONDITION_STORAGE_READY));
        assert!(!status.is_true(CONDITION_SERVICE_READY));
        assert!(status.is_true(CONDITION_CONFIGURATION_READY));

        let external = self::cluster();
        let mut status = ComponentStatus::default();
        HarborClusterComposer.finalize(&external, &RunReport::default(), &mut status);
        assert_eq!(
            status.condition(CONDITION_CACHE_READY).unwrap().reason.as_deref(),
            Some(REASON_EXTERNAL)
        );
    }
}
