//! Registry: the docker distribution serving image layers

use super::core::{REDIS_PASSWORD_KEY, SECRET_SECRET_KEY};
use super::{
    add_internal_tls, add_secret_refs, add_workload, internal_tls_path, proxy_env,
    storage_credentials, to_yaml, version_of, workload_status, Workload,
};
use crate::api::common::StorageDriverSpec;
use crate::api::v1beta1::Registry;
use crate::error::Result;
use crate::graph::RunReport;
use crate::images::{self, Component};
use crate::reconciler::{Composer, ResourceManager};
use crate::resources::{
    claim_volume, config_map_volume, env_from_secret, http_probe, internal_tls, mount,
    secret_volume, service_port, ResourceBuilder,
};
use crate::secrets::SECRET_HTPASSWD_KEY;
use crate::status::ComponentStatus;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Key of the registry configuration in its config map
pub const CONFIG_KEY: &str = "config.yml";
/// Where the registry configuration is mounted
pub const CONFIG_PATH: &str = "/etc/registry";
/// Root of filesystem storage inside the pod
pub const STORAGE_PATH: &str = "/storage";

const REDIS_DATABASE: u8 = 2;
const GCS_KEY_FILE: &str = "gcs-key.json";

pub struct RegistryComposer;

/// `storage` section of the distribution configuration
pub(crate) fn storage_config(driver: &StorageDriverSpec) -> Value {
    let mut storage = Map::new();
    if let Some(s3) = &driver.s3 {
        let mut s3_config = json!({
            "bucket": s3.bucket,
            "region": s3.region,
            "secure": s3.secure.unwrap_or(true),
        });
        if let Some(endpoint) = &s3.region_endpoint {
            s3_config["regionendpoint"] = json!(endpoint);
        }
        if let Some(root) = &s3.root_directory {
            s3_config["rootdirectory"] = json!(root);
        }
        storage.insert("s3".to_string(), s3_config);
    } else if let Some(azure) = &driver.azure {
        let mut azure_config = json!({
            "accountname": azure.account_name,
            "container": azure.container,
        });
        if let Some(base_url) = &azure.base_url {
            azure_config["realm"] = json!(base_url);
        }
        storage.insert("azure".to_string(), azure_config);
    } else if let Some(gcs) = &driver.gcs {
        let mut gcs_config = json!({
            "bucket": gcs.bucket,
            "keyfile": format!("{}/{}", CONFIG_PATH, GCS_KEY_FILE),
        });
        if let Some(root) = &gcs.root_directory {
            gcs_config["rootdirectory"] = json!(root);
        }
        storage.insert("gcs".to_string(), gcs_config);
    } else {
        storage.insert(
            "filesystem".to_string(),
            json!({ "rootdirectory": STORAGE_PATH }),
        );
    }
    storage.insert("cache".to_string(), json!({ "layerinfo": "redis" }));
    storage.insert("maintenance".to_string(), json!({ "uploadpurging": { "enabled": false } }));
    storage.insert("delete".to_string(), json!({ "enabled": true }));
    storage.insert("redirect".to_string(), json!({ "disable": driver.file_system.is_some() }));
    Value::Object(storage)
}

/// Volumes, mounts and environment giving a pod access to the storage
pub(crate) fn storage_access(driver: &StorageDriverSpec) -> (Vec<Volume>, Vec<VolumeMount>, Vec<EnvVar>) {
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();
    let mut env = Vec::new();

    if let Some(fs) = &driver.file_system {
        volumes.push(claim_volume("storage", &fs.claim_name));
        mounts.push(mount("storage", STORAGE_PATH, fs.sub_path.as_deref()));
    }
    if let Some(s3) = &driver.s3 {
        if let Some(credentials) = &s3.credentials_ref {
            env.push(env_from_secret("REGISTRY_STORAGE_S3_ACCESSKEY", credentials, "accesskey"));
            env.push(env_from_secret("REGISTRY_STORAGE_S3_SECRETKEY", credentials, "secretkey"));
        }
    }
    if let Some(azure) = &driver.azure {
        env.push(env_from_secret(
            "REGISTRY_STORAGE_AZURE_ACCOUNTKEY",
            &azure.account_key_ref,
            "accountkey",
        ));
    }
    if let Some(gcs) = &driver.gcs {
        volumes.push(secret_volume("gcs-key", &gcs.key_ref, &[(GCS_KEY_FILE, GCS_KEY_FILE)]));
        mounts.push(mount(
            "gcs-key",
            &format!("{}/{}", CONFIG_PATH, GCS_KEY_FILE),
            Some(GCS_KEY_FILE),
        ));
    }
    (volumes, mounts, env)
}

fn configuration(registry: &Registry) -> Result<String> {
    let spec = &registry.spec;
    let tls = spec.tls.is_some();
    let port = Component::Registry.port();

    let mut http = json!({
        "addr": format!(":{}", port),
        "relativeurls": true,
        "draintimeout": "60s",
    });
    if tls {
        http["tls"] = json!({
            "certificate": internal_tls_path(Component::Registry, "tls.crt"),
            "key": internal_tls_path(Component::Registry, "tls.key"),
        });
    }
    if let Some(metrics) = spec.metrics.as_ref().filter(|m| m.enabled) {
        http["debug"] = json!({
            "addr": format!(":{}", metrics.port),
            "prometheus": { "enabled": true, "path": metrics.path },
        });
    }

    let mut config = json!({
        "version": 0.1,
        "log": { "level": spec.log_level, "fields": { "service": "registry" } },
        "storage": storage_config(&spec.storage),
        "http": http,
        "auth": {
            "htpasswd": { "realm": "harbor-registry-basic-realm", "path": format!("{}/passwd", CONFIG_PATH) }
        },
        "validation": { "disabled": true },
        "compatibility": { "schema1": { "enabled": true } },
    });

    match &spec.redis {
        Some(redis) => {
            config["redis"] = json!({
                "addr": format!("{}:{}", redis.host, redis.port.unwrap_or(6379)),
                "db": REDIS_DATABASE,
            });
        }
        None => {
            config["storage"]["cache"] = json!({ "blobdescriptor": "inmemory" });
        }
    }

    to_yaml(&config)
}

#[async_trait]
impl Composer<Registry> for RegistryComposer {
    async fn add_resources(&self, registry: &Registry, manager: &mut ResourceManager) -> Result<()> {
        let spec = &registry.spec;
        let version = version_of(registry);
        let builder = ResourceBuilder::new(registry, Component::Registry, &spec.component, &version)?;
        let tls = spec.tls.is_some();
        let port = Component::Registry.port();

        let config = builder.config_map(
            builder.name().to_string(),
            BTreeMap::from([(CONFIG_KEY.to_string(), configuration(registry)?)]),
        );
        let mut parents = vec![manager.add_config_map(&config, &[])?];
        parents.extend(add_secret_refs(
            manager,
            &[
                Some(spec.http_secret_ref.as_str()),
                Some(spec.authentication_ref.as_str()),
                storage_credentials(&spec.storage),
                spec.redis.as_ref().and_then(|r| r.password_ref.as_deref()),
            ],
        )?);

        let (mut volumes, mut mounts, mut env) = storage_access(&spec.storage);
        volumes.push(config_map_volume("config", builder.name()));
        mounts.push(mount("config", &format!("{}/{}", CONFIG_PATH, CONFIG_KEY), Some(CONFIG_KEY)));
        volumes.push(secret_volume(
            "authentication",
            &spec.authentication_ref,
            &[(SECRET_HTPASSWD_KEY, "passwd")],
        ));
        mounts.push(mount("authentication", &format!("{}/passwd", CONFIG_PATH), Some("passwd")));

        env.push(env_from_secret("REGISTRY_HTTP_SECRET", &spec.http_secret_ref, SECRET_SECRET_KEY));
        if let Some(password) = spec.redis.as_ref().and_then(|r| r.password_ref.as_deref()) {
            env.push(env_from_secret("REGISTRY_REDIS_PASSWORD", password, REDIS_PASSWORD_KEY));
        }
        env.extend(proxy_env(spec.proxy.as_ref()));

        if let Some(tls_spec) = &spec.tls {
            parents.extend(add_internal_tls(manager, Some(tls_spec))?);
            let (volume, tls_mount) = internal_tls(Component::Registry, &tls_spec.certificate_ref);
            volumes.push(volume);
            mounts.push(tls_mount);
        }

        let mut container = builder.container(images::resolve(
            Component::Registry,
            &version,
            &spec.component.image_options(),
        ));
        container.env = Some(env);
        container.volume_mounts = Some(mounts);
        container.liveness_probe = Some(http_probe("/", port, tls));
        container.readiness_probe = Some(http_probe("/", port, tls));

        let mut ports = vec![port];
        let mut service = builder.default_service(tls);
        if let Some(metrics) = spec.metrics.as_ref().filter(|m| m.enabled) {
            ports.push(metrics.port);
            if let Some(service_ports) = service.spec.as_mut().and_then(|s| s.ports.as_mut()) {
                service_ports.push(service_port("metrics", metrics.port, metrics.port));
            }
        }

        add_workload(
            registry,
            &builder,
            manager,
            Workload {
                deployment: builder.deployment(vec![container], volumes),
                service,
                parents,
                ports,
            },
        )?;
        Ok(())
    }

    fn finalize(&self, registry: &Registry, report: &RunReport, status: &mut ComponentStatus) {
        workload_status(
            report,
            registry.metadata.namespace.as_deref().unwrap_or_default(),
            registry.metadata.name.as_deref().unwrap_or_default(),
            registry.spec.component.replicas,
            status,
        );
    }
}
