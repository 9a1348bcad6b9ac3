//! Core: Harbor's API server and token service

use super::{
    add_internal_tls, add_secret_refs, add_workload, internal_tls_env, proxy_env, scheme,
    version_of, workload_status, Workload,
};
use crate::api::v1beta1::Core;
use crate::error::Result;
use crate::graph::RunReport;
use crate::images::{self, Component};
use crate::reconciler::{Composer, ResourceManager};
use crate::resources::{
    config_map_volume, env_from_config_map, env_from_secret, http_probe, internal_tls, mount,
    secret_volume, service_port, ResourceBuilder,
};
use crate::secrets::{SECRET_KEY_KEY, SECRET_PASSWORD_KEY, SECRET_USERNAME_KEY};
use crate::status::ComponentStatus;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Key of shared component secrets
pub const SECRET_SECRET_KEY: &str = "secret";
/// Key of the CSRF secret
pub const CSRF_KEY_KEY: &str = "key";
/// Key of Redis passwords
pub const REDIS_PASSWORD_KEY: &str = "redis-password";

const REDIS_DATABASE: u8 = 0;

const APP_CONF: &str = "appname = Harbor\nrunmode = prod\nenablegzip = true\n\n[prod]\nhttpport = 8080\n";

pub struct CoreComposer;

fn environment(core: &Core) -> BTreeMap<String, String> {
    let spec = &core.spec;
    let components = &spec.components;
    let (db_host, db_port) = spec.database.primary();

    let mut data = BTreeMap::from([
        ("PORT".to_string(), "8080".to_string()),
        ("LOG_LEVEL".to_string(), spec.log_level.clone()),
        ("EXT_ENDPOINT".to_string(), spec.external_endpoint.clone()),
        ("DATABASE_TYPE".to_string(), "postgresql".to_string()),
        ("POSTGRESQL_HOST".to_string(), db_host),
        ("POSTGRESQL_PORT".to_string(), db_port.to_string()),
        ("POSTGRESQL_USERNAME".to_string(), spec.database.username.clone()),
        (
            "POSTGRESQL_DATABASE".to_string(),
            spec.database.database_or("registry"),
        ),
        (
            "POSTGRESQL_SSLMODE".to_string(),
            spec.database.ssl_mode.clone().unwrap_or_else(|| "disable".to_string()),
        ),
        ("_REDIS_URL_CORE".to_string(), spec.redis.url(REDIS_DATABASE)),
        ("REGISTRY_URL".to_string(), components.registry_url.clone()),
        (
            "REGISTRY_CONTROLLER_URL".to_string(),
            components.registry_controller_url.clone(),
        ),
        ("JOBSERVICE_URL".to_string(), components.jobservice_url.clone()),
        ("PORTAL_URL".to_string(), components.portal_url.clone()),
        (
            "TOKEN_SERVICE_URL".to_string(),
            format!("{}/service/token", core_url(core)),
        ),
        ("CORE_URL".to_string(), core_url(core)),
        ("CORE_LOCAL_URL".to_string(), core_url(core)),
        ("CONFIG_PATH".to_string(), "/etc/core/app.conf".to_string()),
        ("KEY_PATH".to_string(), "/etc/core/key".to_string()),
        ("TOKEN_PRIVATE_KEY_PATH".to_string(), "/etc/core/private_key.pem".to_string()),
    ]);

    data.insert(
        "WITH_CHARTMUSEUM".to_string(),
        components.chartmuseum_url.is_some().to_string(),
    );
    if let Some(url) = &components.chartmuseum_url {
        data.insert("CHART_REPOSITORY_URL".to_string(), url.clone());
    }
    data.insert(
        "WITH_TRIVY".to_string(),
        components.trivy_url.is_some().to_string(),
    );
    if let Some(url) = &components.trivy_url {
        data.insert("TRIVY_ADAPTER_URL".to_string(), url.clone());
    }
    data.insert(
        "WITH_NOTARY".to_string(),
        components.notary_url.is_some().to_string(),
    );
    if let Some(url) = &components.notary_url {
        data.insert("NOTARY_URL".to_string(), url.clone());
    }
    if let Some(metrics) = spec.metrics.as_ref().filter(|m| m.enabled) {
        data.insert("METRIC_ENABLE".to_string(), "true".to_string());
        data.insert("METRIC_PORT".to_string(), metrics.port.to_string());
        data.insert("METRIC_PATH".to_string(), metrics.path.clone());
        data.insert("METRIC_NAMESPACE".to_string(), "harbor".to_string());
        data.insert("METRIC_SUBSYSTEM".to_string(), "core".to_string());
    }
    data
}

fn core_url(core: &Core) -> String {
    format!(
        "{}://{}",
        scheme(core.spec.tls.is_some()),
        core.metadata.name.as_deref().unwrap_or_default()
    )
}

#[async_trait]
impl Composer<Core> for CoreComposer {
    async fn add_resources(&self, core: &Core, manager: &mut ResourceManager) -> Result<()> {
        let spec = &core.spec;
        let version = version_of(core);
        let builder = ResourceBuilder::new(core, Component::Core, &spec.component, &version)?;
        let tls = spec.tls.is_some();
        let port = Component::Core.port();

        let config = builder.config_map(builder.name().to_string(), {
            let mut data = environment(core);
            data.insert("app.conf".to_string(), APP_CONF.to_string());
            data
        });
        let mut parents = vec![manager.add_config_map(&config, &[])?];

        parents.extend(add_secret_refs(
            manager,
            &[
                Some(spec.secret_ref.as_str()),
                Some(spec.encryption_key_ref.as_str()),
                Some(spec.csrf_key_ref.as_str()),
                Some(spec.admin_initial_password_ref.as_str()),
                Some(spec.components.registry_credentials_ref.as_str()),
                Some(spec.components.jobservice_secret_ref.as_str()),
                spec.database.password_ref.as_deref(),
                spec.redis.password_ref.as_deref(),
            ],
        )?);
        parents.push(manager.add_tls_secret(&spec.token_issuer_ref, &[])?);

        let mut env = vec![
            env_from_secret("CORE_SECRET", &spec.secret_ref, SECRET_SECRET_KEY),
            env_from_secret(
                "JOBSERVICE_SECRET",
                &spec.components.jobservice_secret_ref,
                SECRET_SECRET_KEY,
            ),
            env_from_secret(
                "HARBOR_ADMIN_PASSWORD",
                &spec.admin_initial_password_ref,
                SECRET_PASSWORD_KEY,
            ),
            env_from_secret("CSRF_KEY", &spec.csrf_key_ref, CSRF_KEY_KEY),
            env_from_secret(
                "REGISTRY_CREDENTIAL_USERNAME",
                &spec.components.registry_credentials_ref,
                SECRET_USERNAME_KEY,
            ),
            env_from_secret(
                "REGISTRY_CREDENTIAL_PASSWORD",
                &spec.components.registry_credentials_ref,
                SECRET_PASSWORD_KEY,
            ),
        ];
        if let Some(password) = &spec.database.password_ref {
            env.push(env_from_secret("POSTGRESQL_PASSWORD", password, SECRET_PASSWORD_KEY));
        }
        if let Some(password) = &spec.redis.password_ref {
            env.push(env_from_secret("REDIS_PASSWORD", password, REDIS_PASSWORD_KEY));
        }
        env.extend(proxy_env(spec.proxy.as_ref()));

        let mut volumes = vec![
            config_map_volume("config", builder.name()),
            secret_volume("secret-key", &spec.encryption_key_ref, &[(SECRET_KEY_KEY, "key")]),
            secret_volume(
                "token-service-private-key",
                &spec.token_issuer_ref,
                &[("tls.key", "private_key.pem")],
            ),
        ];
        let mut mounts = vec![
            mount("config", "/etc/core/app.conf", Some("app.conf")),
            mount("secret-key", "/etc/core/key", Some("key")),
            mount(
                "token-service-private-key",
                "/etc/core/private_key.pem",
                Some("private_key.pem"),
            ),
        ];

        if let Some(tls_spec) = &spec.tls {
            parents.extend(add_internal_tls(manager, Some(tls_spec))?);
            let (volume, tls_mount) = internal_tls(Component::Core, &tls_spec.certificate_ref);
            volumes.push(volume);
            mounts.push(tls_mount);
            env.extend(internal_tls_env(Component::Core));
        }

        let mut container = builder.container(images::resolve(
            Component::Core,
            &version,
            &spec.component.image_options(),
        ));
        container.env_from = Some(vec![env_from_config_map(builder.name())]);
        container.env = Some(env);
        container.volume_mounts = Some(mounts);
        container.liveness_probe = Some(http_probe("/api/v2.0/ping", port, tls));
        container.readiness_probe = Some(http_probe("/api/v2.0/ping", port, tls));

        let mut ports = vec![port];
        let mut service = builder.default_service(tls);
        if let Some(metrics) = spec.metrics.as_ref().filter(|m| m.enabled) {
            ports.push(metrics.port);
            if let Some(service_ports) = service.spec.as_mut().and_then(|s| s.ports.as_mut()) {
                service_ports.push(service_port("metrics", metrics.port, metrics.port));
            }
        }

        add_workload(
            core,
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

    fn finalize(&self, core: &Core, report: &RunReport, status: &mut ComponentStatus) {
        workload_status(
            report,
            core.metadata.namespace.as_deref().unwrap_or_default(),
            core.metadata.name.as_deref().unwrap_or_default(),
            core.spec.component.replicas,
            status,
        );
    }
}
