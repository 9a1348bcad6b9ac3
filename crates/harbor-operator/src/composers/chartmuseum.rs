//! ChartMuseum: Helm chart repository backed by the image storage

use super::core::REDIS_PASSWORD_KEY;
use super::registry::STORAGE_PATH;
use super::{
    add_internal_tls, add_secret_refs, add_workload, internal_tls_path, storage_credentials,
    version_of, workload_status, Workload,
};
use crate::api::common::StorageDriverSpec;
use crate::api::v1beta1::ChartMuseum;
use crate::error::Result;
use crate::graph::RunReport;
use crate::images::{self, Component};
use crate::reconciler::{Composer, ResourceManager};
use crate::resources::{
    claim_volume, env_from_config_map, env_from_secret, http_probe, internal_tls, mount,
    secret_volume, ResourceBuilder,
};
use crate::status::ComponentStatus;
use async_trait::async_trait;
use std::collections::BTreeMap;

const REDIS_DATABASE: u8 = 3;
const GCS_KEY_PATH: &str = "/etc/chartserver/gcs-key.json";

pub struct ChartMuseumComposer;

fn storage_environment(driver: &StorageDriverSpec, data: &mut BTreeMap<String, String>) {
    let mut set = |key: &str, value: String| {
        data.insert(key.to_string(), value);
    };
    if let Some(s3) = &driver.s3 {
        set("STORAGE", "amazon".into());
        set("STORAGE_AMAZON_BUCKET", s3.bucket.clone());
        set("STORAGE_AMAZON_REGION", s3.region.clone());
        if let Some(endpoint) = &s3.region_endpoint {
            set("STORAGE_AMAZON_ENDPOINT", endpoint.clone());
        }
        if let Some(root) = &s3.root_directory {
            set("STORAGE_AMAZON_PREFIX", root.clone());
        }
    } else if let Some(azure) = &driver.azure {
        set("STORAGE", "microsoft".into());
        set("STORAGE_MICROSOFT_CONTAINER", azure.container.clone());
        set("AZURE_STORAGE_ACCOUNT", azure.account_name.clone());
    } else if let Some(gcs) = &driver.gcs {
        set("STORAGE", "google".into());
        set("STORAGE_GOOGLE_BUCKET", gcs.bucket.clone());
        set("GOOGLE_APPLICATION_CREDENTIALS", GCS_KEY_PATH.into());
        if let Some(root) = &gcs.root_directory {
            set("STORAGE_GOOGLE_PREFIX", root.clone());
        }
    } else {
        set("STORAGE", "local".into());
        set("STORAGE_LOCAL_ROOTDIR", STORAGE_PATH.into());
    }
}

fn environment(chartmuseum: &ChartMuseum) -> BTreeMap<String, String> {
    let spec = &chartmuseum.spec;
    let mut data = BTreeMap::from([
        ("PORT".to_string(), Component::ChartMuseum.port().to_string()),
        ("DEBUG".to_string(), (spec.log_level == "debug").to_string()),
        ("LOG_JSON".to_string(), "true".to_string()),
        ("DISABLE_METRICS".to_string(), "false".to_string()),
        ("DISABLE_API".to_string(), "false".to_string()),
        ("DISABLE_STATEFILES".to_string(), "false".to_string()),
        ("ALLOW_OVERWRITE".to_string(), "true".to_string()),
        ("AUTH_ANONYMOUS_GET".to_string(), "false".to_string()),
        ("BASIC_AUTH_USER".to_string(), "chart_controller".to_string()),
        ("DEPTH".to_string(), "1".to_string()),
        ("CHART_URL".to_string(), spec.chart_url.clone()),
        ("CONTEXT_PATH".to_string(), String::new()),
        ("INDEX_LIMIT".to_string(), "0".to_string()),
        ("MAX_STORAGE_OBJECTS".to_string(), "0".to_string()),
        ("MAX_UPLOAD_SIZE".to_string(), "20971520".to_string()),
        ("CHART_POST_FORM_FIELD_NAME".to_string(), "chart".to_string()),
        ("PROV_POST_FORM_FIELD_NAME".to_string(), "prov".to_string()),
    ]);
    match &spec.cache {
        Some(redis) => {
            data.insert("CACHE".to_string(), "redis".to_string());
            data.insert(
                "CACHE_REDIS_ADDR".to_string(),
                format!("{}:{}", redis.host, redis.port.unwrap_or(6379)),
            );
            data.insert("CACHE_REDIS_DB".to_string(), REDIS_DATABASE.to_string());
        }
        None => {
            data.insert("CACHE".to_string(), String::new());
        }
    }
    if spec.tls.is_some() {
        data.insert(
            "TLS_CERT".to_string(),
            internal_tls_path(Component::ChartMuseum, "tls.crt"),
        );
        data.insert(
            "TLS_KEY".to_string(),
            internal_tls_path(Component::ChartMuseum, "tls.key"),
        );
    }
    storage_environment(&spec.storage, &mut data);
    data
}

#[async_trait]
impl Composer<ChartMuseum> for ChartMuseumComposer {
    async fn add_resources(
        &self,
        chartmuseum: &ChartMuseum,
        manager: &mut ResourceManager,
    ) -> Result<()> {
        let spec = &chartmuseum.spec;
        let version = version_of(chartmuseum);
        let builder =
            ResourceBuilder::new(chartmuseum, Component::ChartMuseum, &spec.component, &version)?;
        let tls = spec.tls.is_some();
        let port = Component::ChartMuseum.port();

        let config = builder.config_map(builder.name().to_string(), environment(chartmuseum));
        let mut parents = vec![manager.add_config_map(&config, &[])?];
        let cache_password = spec.cache.as_ref().and_then(|c| c.password_ref.as_deref());
        parents.extend(add_secret_refs(
            manager,
            &[storage_credentials(&spec.storage), cache_password],
        )?);

        let mut env = Vec::new();
        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        if let Some(fs) = &spec.storage.file_system {
            volumes.push(claim_volume("storage", &fs.claim_name));
            let sub_path = match &fs.sub_path {
                Some(sub_path) => format!("{}/chartmuseum", sub_path),
                None => "chartmuseum".to_string(),
            };
            mounts.push(mount("storage", STORAGE_PATH, Some(&sub_path)));
        }
        if let Some(credentials) = spec.storage.s3.as_ref().and_then(|s3| s3.credentials_ref.as_deref()) {
            env.push(env_from_secret("AWS_ACCESS_KEY_ID", credentials, "accesskey"));
            env.push(env_from_secret("AWS_SECRET_ACCESS_KEY", credentials, "secretkey"));
        }
        if let Some(azure) = &spec.storage.azure {
            env.push(env_from_secret(
                "AZURE_STORAGE_ACCESS_KEY",
                &azure.account_key_ref,
                "accountkey",
            ));
        }
        if let Some(gcs) = &spec.storage.gcs {
            volumes.push(secret_volume("gcs-key", &gcs.key_ref, &[("gcs-key.json", "gcs-key.json")]));
            mounts.push(mount("gcs-key", GCS_KEY_PATH, Some("gcs-key.json")));
        }
        if let Some(password) = cache_password {
            env.push(env_from_secret("CACHE_REDIS_PASSWORD", password, REDIS_PASSWORD_KEY));
        }

        if let Some(tls_spec) = &spec.tls {
            parents.extend(add_internal_tls(manager, Some(tls_spec))?);
            let (volume, tls_mount) = internal_tls(Component::ChartMuseum, &tls_spec.certificate_ref);
            volumes.push(volume);
            mounts.push(tls_mount);
        }

        let mut container = builder.container(images::resolve(
            Component::ChartMuseum,
            &version,
            &spec.component.image_options(),
        ));
        container.env_from = Some(vec![env_from_config_map(builder.name())]);
        container.env = Some(env);
        container.volume_mounts = Some(mounts);
        container.liveness_probe = Some(http_probe("/health", port, tls));
        container.readiness_probe = Some(http_probe("/health", port, tls));

        add_workload(
            chartmuseum,
            &builder,
            manager,
            Workload {
                deployment: builder.deployment(vec![container], volumes),
                service: builder.default_service(tls),
                parents,
                ports: vec![port],
            },
        )?;
        Ok(())
    }

    fn finalize(&self, chartmuseum: &ChartMuseum, report: &RunReport, status: &mut ComponentStatus) {
        workload_status(
            report,
            chartmuseum.metadata.namespace.as_deref().unwrap_or_default(),
            chartmuseum.metadata.name.as_deref().unwrap_or_default(),
            chartmuseum.spec.component.replicas,
            status,
        );
    }
}
