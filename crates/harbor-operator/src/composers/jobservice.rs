//! JobService: replication, scan and garbage collection jobs

use super::core::{REDIS_PASSWORD_KEY, SECRET_SECRET_KEY};
use super::{
    add_internal_tls, add_secret_refs, add_workload, internal_tls_env, internal_tls_path,
    proxy_env, to_yaml, version_of, workload_status, Workload,
};
use crate::api::v1beta1::JobService;
use crate::error::Result;
use crate::graph::RunReport;
use crate::images::{self, Component};
use crate::reconciler::{Composer, ResourceManager};
use crate::resources::{
    claim_volume, config_map_volume, env, env_from_secret, http_probe, internal_tls, mount,
    service_port, ResourceBuilder,
};
use crate::secrets::{SECRET_PASSWORD_KEY, SECRET_USERNAME_KEY};
use crate::status::ComponentStatus;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

const CONFIG_KEY: &str = "config.yml";
const CONFIG_PATH: &str = "/etc/jobservice";
const LOGS_PATH: &str = "/var/log/jobs";
const REDIS_DATABASE: u8 = 1;

pub struct JobServiceComposer;

fn configuration(jobservice: &JobService) -> Result<String> {
    let spec = &jobservice.spec;
    let port = Component::JobService.port();

    let mut job_loggers = vec![json!({
        "name": "STD_OUTPUT",
        "level": spec.log_level.to_uppercase(),
    })];
    if spec.logs_claim_name.is_some() {
        job_loggers.push(json!({
            "name": "FILE",
            "level": spec.log_level.to_uppercase(),
            "settings": { "base_dir": LOGS_PATH },
            "sweeper": { "duration": 14, "settings": { "work_dir": LOGS_PATH } },
        }));
    }

    let mut config = json!({
        "protocol": if spec.tls.is_some() { "https" } else { "http" },
        "port": port,
        "worker_pool": {
            "workers": spec.workers,
            "backend": "redis",
            "redis_pool": {
                "redis_url": spec.redis.url(REDIS_DATABASE),
                "namespace": "harbor_job_service_namespace",
                "idle_timeout_second": 3600,
            },
        },
        "job_loggers": job_loggers,
        "loggers": [{ "name": "STD_OUTPUT", "level": spec.log_level.to_uppercase() }],
    });
    if spec.tls.is_some() {
        config["https_config"] = json!({
            "cert": internal_tls_path(Component::JobService, "tls.crt"),
            "key": internal_tls_path(Component::JobService, "tls.key"),
        });
    }
    if let Some(metrics) = spec.metrics.as_ref().filter(|m| m.enabled) {
        config["metric"] = json!({
            "enabled": true,
            "path": metrics.path,
            "port": metrics.port,
        });
    }
    to_yaml(&config)
}

#[async_trait]
impl Composer<JobService> for JobServiceComposer {
    async fn add_resources(
        &self,
        jobservice: &JobService,
        manager: &mut ResourceManager,
    ) -> Result<()> {
        let spec = &jobservice.spec;
        let version = version_of(jobservice);
        let builder =
            ResourceBuilder::new(jobservice, Component::JobService, &spec.component, &version)?;
        let tls = spec.tls.is_some();
        let port = Component::JobService.port();

        let config = builder.config_map(
            builder.name().to_string(),
            BTreeMap::from([(CONFIG_KEY.to_string(), configuration(jobservice)?)]),
        );
        let mut parents = vec![manager.add_config_map(&config, &[])?];
        parents.extend(add_secret_refs(
            manager,
            &[
                Some(spec.secret_ref.as_str()),
                Some(spec.core_secret_ref.as_str()),
                Some(spec.registry_credentials_ref.as_str()),
                spec.redis.password_ref.as_deref(),
            ],
        )?);

        let mut env = vec![
            env("CORE_URL", spec.core_url.clone()),
            env("TOKEN_SERVICE_URL", format!("{}/service/token", spec.core_url)),
            env_from_secret("JOBSERVICE_SECRET", &spec.secret_ref, SECRET_SECRET_KEY),
            env_from_secret("CORE_SECRET", &spec.core_secret_ref, SECRET_SECRET_KEY),
            env_from_secret(
                "REGISTRY_CREDENTIAL_USERNAME",
                &spec.registry_credentials_ref,
                SECRET_USERNAME_KEY,
            ),
            env_from_secret(
                "REGISTRY_CREDENTIAL_PASSWORD",
                &spec.registry_credentials_ref,
                SECRET_PASSWORD_KEY,
            ),
        ];
        if let Some(password) = &spec.redis.password_ref {
            env.push(env_from_secret("JOB_SERVICE_POOL_REDIS_PASSWORD", password, REDIS_PASSWORD_KEY));
        }
        env.extend(proxy_env(spec.proxy.as_ref()));

        let mut volumes = vec![config_map_volume("config", builder.name())];
        let mut mounts = vec![mount(
            "config",
            &format!("{}/{}", CONFIG_PATH, CONFIG_KEY),
            Some(CONFIG_KEY),
        )];
        if let Some(claim) = &spec.logs_claim_name {
            volumes.push(claim_volume("job-logs", claim));
            mounts.push(mount("job-logs", LOGS_PATH, None));
        }

        if let Some(tls_spec) = &spec.tls {
            parents.extend(add_internal_tls(manager, Some(tls_spec))?);
            let (volume, tls_mount) = internal_tls(Component::JobService, &tls_spec.certificate_ref);
            volumes.push(volume);
            mounts.push(tls_mount);
            env.extend(internal_tls_env(Component::JobService));
        }

        let mut container = builder.container(images::resolve(
            Component::JobService,
            &version,
            &spec.component.image_options(),
        ));
        container.env = Some(env);
        container.volume_mounts = Some(mounts);
        container.liveness_probe = Some(http_probe("/api/v1/stats", port, tls));
        container.readiness_probe = Some(http_probe("/api/v1/stats", port, tls));

        let mut ports = vec![port];
        let mut service = builder.default_service(tls);
        if let Some(metrics) = spec.metrics.as_ref().filter(|m| m.enabled) {
            ports.push(metrics.port);
            if let Some(service_ports) = service.spec.as_mut().and_then(|s| s.ports.as_mut()) {
                service_ports.push(service_port("metrics", metrics.port, metrics.port));
            }
        }

        add_workload(
            jobservice,
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

    fn finalize(&self, jobservice: &JobService, report: &RunReport, status: &mut ComponentStatus) {
        workload_status(
            report,
            jobservice.metadata.namespace.as_deref().unwrap_or_default(),
            jobservice.metadata.name.as_deref().unwrap_or_default(),
            jobservice.spec.component.replicas,
            status,
        );
    }
}
