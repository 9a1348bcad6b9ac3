//! Exporter: Prometheus metrics about projects, repositories and jobs

use super::{
    add_internal_tls, add_secret_refs, add_workload, internal_tls_env, version_of,
    workload_status, Workload,
};
use crate::api::v1beta1::Exporter;
use crate::error::Result;
use crate::graph::RunReport;
use crate::images::{self, Component};
use crate::reconciler::{Composer, ResourceManager};
use crate::resources::{env_from_config_map, env_from_secret, http_probe, internal_tls, ResourceBuilder};
use crate::secrets::SECRET_PASSWORD_KEY;
use crate::status::ComponentStatus;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Default metrics cache lifetime
const CACHE_DURATION_SECONDS: i32 = 23;

pub struct ExporterComposer;

fn environment(exporter: &Exporter) -> BTreeMap<String, String> {
    let spec = &exporter.spec;
    let (db_host, db_port) = spec.database.primary();
    BTreeMap::from([
        ("LOG_LEVEL".to_string(), spec.log_level.clone()),
        ("HARBOR_EXPORTER_PORT".to_string(), Component::Exporter.port().to_string()),
        ("HARBOR_EXPORTER_METRICS_PATH".to_string(), "/metrics".to_string()),
        ("HARBOR_EXPORTER_METRICS_ENABLED".to_string(), "true".to_string()),
        ("HARBOR_EXPORTER_MAX_REQUESTS".to_string(), "30".to_string()),
        (
            "HARBOR_EXPORTER_CACHE_TIME".to_string(),
            spec.cache_duration_seconds
                .unwrap_or(CACHE_DURATION_SECONDS)
                .to_string(),
        ),
        (
            "HARBOR_EXPORTER_CACHE_CLEAN_INTERVAL".to_string(),
            "14400".to_string(),
        ),
        ("HARBOR_METRIC_NAMESPACE".to_string(), "harbor".to_string()),
        ("HARBOR_METRIC_SUBSYSTEM".to_string(), "exporter".to_string()),
        ("HARBOR_SERVICE_HOST".to_string(), spec.core_url.clone()),
        ("HARBOR_DATABASE_HOST".to_string(), db_host),
        ("HARBOR_DATABASE_PORT".to_string(), db_port.to_string()),
        ("HARBOR_DATABASE_USERNAME".to_string(), spec.database.username.clone()),
        (
            "HARBOR_DATABASE_DBNAME".to_string(),
            spec.database.database_or("registry"),
        ),
        (
            "HARBOR_DATABASE_SSLMODE".to_string(),
            spec.database
                .ssl_mode
                .clone()
                .unwrap_or_else(|| "disable".to_string()),
        ),
        ("HARBOR_DATABASE_MAX_IDLE_CONNS".to_string(), "100".to_string()),
        ("HARBOR_DATABASE_MAX_OPEN_CONNS".to_string(), "900".to_string()),
    ])
}

#[async_trait]
impl Composer<Exporter> for ExporterComposer {
    async fn add_resources(&self, exporter: &Exporter, manager: &mut ResourceManager) -> Result<()> {
        let spec = &exporter.spec;
        let version = version_of(exporter);
        let builder =
            ResourceBuilder::new(exporter, Component::Exporter, &spec.component, &version)?;
        let port = Component::Exporter.port();

        let config = builder.config_map(builder.name().to_string(), environment(exporter));
        let mut parents = vec![manager.add_config_map(&config, &[])?];
        parents.extend(add_secret_refs(manager, &[spec.database.password_ref.as_deref()])?);

        let mut env = Vec::new();
        if let Some(password) = &spec.database.password_ref {
            env.push(env_from_secret("HARBOR_DATABASE_PASSWORD", password, SECRET_PASSWORD_KEY));
        }

        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        if let Some(tls_spec) = &spec.tls {
            parents.extend(add_internal_tls(manager, Some(tls_spec))?);
            let (volume, tls_mount) = internal_tls(Component::Exporter, &tls_spec.certificate_ref);
            volumes.push(volume);
            mounts.push(tls_mount);
            env.extend(internal_tls_env(Component::Exporter));
        }

        let mut container = builder.container(images::resolve(
            Component::Exporter,
            &version,
            &spec.component.image_options(),
        ));
        container.env_from = Some(vec![env_from_config_map(builder.name())]);
        container.env = Some(env);
        if !mounts.is_empty() {
            container.volume_mounts = Some(mounts);
        }
        // the exporter serves metrics in clear text even with internal TLS
        container.liveness_probe = Some(http_probe("/", port, false));
        container.readiness_probe = Some(http_probe("/", port, false));

        add_workload(
            exporter,
            &builder,
            manager,
            Workload {
                deployment: builder.deployment(vec![container], volumes),
                service: builder.default_service(false),
                parents,
                ports: vec![port],
            },
        )?;
        Ok(())
    }

    fn finalize(&self, exporter: &Exporter, report: &RunReport, status: &mut ComponentStatus) {
        workload_status(
            report,
            exporter.metadata.namespace.as_deref().unwrap_or_default(),
            exporter.metadata.name.as_deref().unwrap_or_default(),
            exporter.spec.component.replicas,
            status,
        );
    }
}
