//! Trivy: the vulnerability scanner adapter

use super::core::REDIS_PASSWORD_KEY;
use super::{
    add_internal_tls, add_secret_refs, add_workload, internal_tls_path, proxy_env, version_of,
    workload_status, Workload,
};
use crate::api::v1beta1::Trivy;
use crate::config;
use crate::error::Result;
use crate::graph::RunReport;
use crate::images::{self, Component};
use crate::reconciler::{Composer, ResourceManager};
use crate::resources::{
    claim_volume, empty_dir_volume, env_from_config_map, env_from_secret, http_probe,
    internal_tls, mount, ResourceBuilder,
};
use crate::status::ComponentStatus;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Key of the GitHub token in its secret
pub const GITHUB_TOKEN_KEY: &str = "github-token";
/// Purpose of the GitHub token in the operator configuration
pub const GITHUB_UPSTREAM: &str = "github";

const REDIS_DATABASE: u8 = 5;
const CACHE_PATH: &str = "/home/scanner/.cache/trivy";
const REPORTS_PATH: &str = "/home/scanner/.cache/reports";

pub struct TrivyComposer;

fn environment(trivy: &Trivy) -> BTreeMap<String, String> {
    let spec = &trivy.spec;
    let redis_url = spec.redis.url(REDIS_DATABASE);
    let mut data = BTreeMap::from([
        ("SCANNER_LOG_LEVEL".to_string(), spec.log_level.clone()),
        (
            "SCANNER_API_SERVER_ADDR".to_string(),
            format!(":{}", Component::Trivy.port()),
        ),
        ("SCANNER_TRIVY_CACHE_DIR".to_string(), CACHE_PATH.to_string()),
        ("SCANNER_TRIVY_REPORTS_DIR".to_string(), REPORTS_PATH.to_string()),
        ("SCANNER_TRIVY_VULN_TYPE".to_string(), "os,library".to_string()),
        (
            "SCANNER_TRIVY_SEVERITY".to_string(),
            spec.severity
                .clone()
                .unwrap_or_else(|| "UNKNOWN,LOW,MEDIUM,HIGH,CRITICAL".to_string()),
        ),
        ("SCANNER_TRIVY_IGNORE_UNFIXED".to_string(), "false".to_string()),
        ("SCANNER_TRIVY_SKIP_UPDATE".to_string(), spec.skip_update.to_string()),
        ("SCANNER_TRIVY_OFFLINE_SCAN".to_string(), spec.offline_scan.to_string()),
        ("SCANNER_TRIVY_INSECURE".to_string(), "false".to_string()),
        ("SCANNER_TRIVY_TIMEOUT".to_string(), "5m0s".to_string()),
        ("SCANNER_REDIS_URL".to_string(), redis_url.clone()),
        ("SCANNER_STORE_REDIS_URL".to_string(), redis_url.clone()),
        ("SCANNER_JOB_QUEUE_REDIS_URL".to_string(), redis_url),
        (
            "SCANNER_STORE_REDIS_NAMESPACE".to_string(),
            "harbor.scanner.trivy:store".to_string(),
        ),
        (
            "SCANNER_JOB_QUEUE_REDIS_NAMESPACE".to_string(),
            "harbor.scanner.trivy:job-queue".to_string(),
        ),
    ]);
    if spec.tls.is_some() {
        data.insert(
            "SCANNER_API_SERVER_TLS_CERTIFICATE".to_string(),
            internal_tls_path(Component::Trivy, "tls.crt"),
        );
        data.insert(
            "SCANNER_API_SERVER_TLS_KEY".to_string(),
            internal_tls_path(Component::Trivy, "tls.key"),
        );
        data.insert(
            "SCANNER_API_SERVER_CLIENTCAS".to_string(),
            internal_tls_path(Component::Trivy, "ca.crt"),
        );
    }
    data
}

#[async_trait]
impl Composer<Trivy> for TrivyComposer {
    async fn add_resources(&self, trivy: &Trivy, manager: &mut ResourceManager) -> Result<()> {
        let spec = &trivy.spec;
        let version = version_of(trivy);
        let builder = ResourceBuilder::new(trivy, Component::Trivy, &spec.component, &version)?;
        let tls = spec.tls.is_some();
        let port = Component::Trivy.port();

        let config = builder.config_map(builder.name().to_string(), environment(trivy));
        let mut parents = vec![manager.add_config_map(&config, &[])?];
        parents.extend(add_secret_refs(
            manager,
            &[spec.redis.password_ref.as_deref()],
        )?);

        let mut env = Vec::new();
        if let Some(password) = &spec.redis.password_ref {
            env.push(env_from_secret("SCANNER_REDIS_PASSWORD", password, REDIS_PASSWORD_KEY));
        }

        // user secret first, then the operator wide token
        let github_secret = match spec.github_token_ref.as_deref().filter(|r| !r.is_empty()) {
            Some(secret) => {
                parents.push(manager.add_secret_dependency(secret)?);
                Some(secret.to_string())
            }
            None => match config::with(|c| c.upstream_tokens.get(GITHUB_UPSTREAM).cloned()) {
                Some(token) => {
                    let name = builder.child_name("github");
                    let secret = builder.secret(
                        name.clone(),
                        BTreeMap::from([(GITHUB_TOKEN_KEY.to_string(), token)]),
                    );
                    parents.push(manager.add_secret(&secret, &[])?);
                    Some(name)
                }
                None => None,
            },
        };
        if let Some(secret) = &github_secret {
            env.push(env_from_secret("SCANNER_TRIVY_GITHUB_TOKEN", secret, GITHUB_TOKEN_KEY));
        }
        env.extend(proxy_env(spec.proxy.as_ref()));

        let mut volumes = vec![
            match &spec.storage.cache_claim_name {
                Some(claim) => claim_volume("cache", claim),
                None => empty_dir_volume("cache"),
            },
            match &spec.storage.reports_claim_name {
                Some(claim) => claim_volume("reports", claim),
                None => empty_dir_volume("reports"),
            },
        ];
        let mut mounts = vec![
            mount("cache", CACHE_PATH, None),
            mount("reports", REPORTS_PATH, None),
        ];

        if let Some(tls_spec) = &spec.tls {
            parents.extend(add_internal_tls(manager, Some(tls_spec))?);
            let (volume, tls_mount) = internal_tls(Component::Trivy, &tls_spec.certificate_ref);
            volumes.push(volume);
            mounts.push(tls_mount);
        }

        let mut container = builder.container(images::resolve(
            Component::Trivy,
            &version,
            &spec.component.image_options(),
        ));
        container.env_from = Some(vec![env_from_config_map(builder.name())]);
        container.env = Some(env);
        container.volume_mounts = Some(mounts);
        container.liveness_probe = Some(http_probe("/probe/healthy", port, tls));
        container.readiness_probe = Some(http_probe("/probe/ready", port, tls));

        add_workload(
            trivy,
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

    fn finalize(&self, trivy: &Trivy, report: &RunReport, status: &mut ComponentStatus) {
        workload_status(
            report,
            trivy.metadata.namespace.as_deref().unwrap_or_default(),
            trivy.metadata.name.as_deref().unwrap_or_default(),
            trivy.spec.component.replicas,
            status,
        );
    }
}
