//! Robot accounts: credentials and a pull secret for one project

use crate::api::v1beta1::{Harbor, RobotAccount};
use crate::config::{self, OPERATOR_NAME};
use crate::error::{OperatorError, Result, REASON_DEPENDENCY_SPEC};
use crate::readiness::ReadinessCheck;
use crate::reconciler::{Composer, ResourceManager};
use crate::resources::{typed_secret, LABEL_INSTANCE, LABEL_MANAGED_BY, SECRET_TYPE_OPAQUE};
use crate::secrets::{self, SECRET_PASSWORD_KEY, SECRET_USERNAME_KEY};
use async_trait::async_trait;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ApiResource;
use serde_json::json;
use std::collections::BTreeMap;

/// Key of the docker configuration in pull secrets
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";
const DOCKER_CONFIG_TYPE: &str = "kubernetes.io/dockerconfigjson";

pub struct RobotAccountComposer;

/// Harbor robot user name for a project
pub fn robot_username(project: &str, name: &str) -> String {
    format!("robot${}+{}", project, name)
}

/// Registry host from an external URL
pub fn registry_host(external_url: &str) -> Option<&str> {
    let rest = external_url
        .strip_prefix("https://")
        .or_else(|| external_url.strip_prefix("http://"))?;
    rest.split('/').next().filter(|host| !host.is_empty())
}

/// `.dockerconfigjson` content granting access to one host
pub fn docker_config(host: &str, username: &str, password: &str) -> Result<String> {
    let auth = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    Ok(serde_json::to_string(&json!({
        "auths": {
            host: { "username": username, "password": password, "auth": auth }
        }
    }))?)
}

fn secret(robot: &RobotAccount, name: String, type_: &str, data: BTreeMap<String, String>) -> Secret {
    let metadata = ObjectMeta {
        name: Some(name),
        namespace: robot.metadata.namespace.clone(),
        labels: Some(BTreeMap::from([
            (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
            (
                LABEL_INSTANCE.to_string(),
                robot.metadata.name.clone().unwrap_or_default(),
            ),
        ])),
        ..Default::default()
    };
    typed_secret(metadata, type_, data)
}

#[async_trait]
impl Composer<RobotAccount> for RobotAccountComposer {
    async fn add_resources(&self, robot: &RobotAccount, manager: &mut ResourceManager) -> Result<()> {
        let spec = &robot.spec;
        let name = robot.metadata.name.clone().unwrap_or_default();

        let harbor_ar = ApiResource::erase::<Harbor>(&());
        let Some(harbor) = manager
            .client()
            .get(&harbor_ar, manager.namespace(), &spec.harbor_ref)
            .await?
        else {
            return Err(OperatorError::not_ready(format!(
                "harbor {} not found",
                spec.harbor_ref
            )));
        };
        let harbor: Harbor = serde_json::from_value(serde_json::to_value(harbor)?)?;
        let host = registry_host(&harbor.spec.harbor.external_url)
            .ok_or_else(|| {
                OperatorError::fatal(
                    REASON_DEPENDENCY_SPEC,
                    format!(
                        "harbor {} has no usable external URL",
                        spec.harbor_ref
                    ),
                )
            })?
            .to_string();
        let harbor_key =
            manager.add_external(harbor_ar, &spec.harbor_ref, ReadinessCheck::Component, &[])?;

        let credentials_name = format!("{}-credentials", name);
        let username = robot_username(&spec.project, &name);
        let password = manager
            .secret_value_or(&credentials_name, SECRET_PASSWORD_KEY, || {
                secrets::generate(config::with(|c| c.password_budget))
            })
            .await?;

        let credentials = secret(
            robot,
            credentials_name,
            SECRET_TYPE_OPAQUE,
            BTreeMap::from([
                (SECRET_USERNAME_KEY.to_string(), username.clone()),
                (SECRET_PASSWORD_KEY.to_string(), password.clone()),
            ]),
        );
        let credentials_key =
            manager.add_immutable_secret(&credentials, std::slice::from_ref(&harbor_key))?;

        let pull_secret = secret(
            robot,
            spec.pull_secret_name
                .clone()
                .unwrap_or_else(|| format!("{}-pull-secret", name)),
            DOCKER_CONFIG_TYPE,
            BTreeMap::from([(
                DOCKER_CONFIG_KEY.to_string(),
                docker_config(&host, &username, &password)?,
            )]),
        );
        manager.add_secret(&pull_secret, &[harbor_key, credentials_key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1beta1::{EmbeddedHarborSpec, HarborSpec, RobotAccountSpec};
    use crate::cluster_client::MemoryCluster;
    use crate::composers::testing::declares;
    use crate::mutation::OwnerInfo;
    use std::sync::Arc;

    fn robot() -> RobotAccount {
        let mut robot = RobotAccount::new(
            "ci",
            RobotAccountSpec {
                harbor_ref: "sample".into(),
                project: "library".into(),
                permissions: vec!["pull".into()],
                pull_secret_name: None,
            },
        );
        robot.metadata.namespace = Some("registry".into());
        robot
    }

    fn manager(cluster: Arc<MemoryCluster>) -> ResourceManager {
        ResourceManager::new(
            cluster,
            OwnerInfo {
                api_version: "goharbor.io/v1beta1".into(),
                kind: "RobotAccount".into(),
                name: "ci".into(),
                namespace: "registry".into(),
                uid: "owner-uid".into(),
                generation: 1,
            },
            "",
        )
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("https://harbor.example.com"), Some("harbor.example.com"));
        assert_eq!(registry_host("http://harbor:8080/path"), Some("harbor:8080"));
        assert_eq!(registry_host("harbor.example.com"), None);
        assert_eq!(registry_host("https://"), None);
    }

    #[test]
    fn test_docker_config() {
        let raw = docker_config("harbor.example.com", "robot$library+ci", "secret").unwrap();
        let config: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &config["auths"]["harbor.example.com"];
        assert_eq!(entry["username"], "robot$library+ci");
        assert_eq!(
            entry["auth"],
            base64::engine::general_purpose::STANDARD.encode("robot$library+ci:secret")
        );
    }

    #[tokio::test]
    async fn test_waits_for_harbor() {
        let robot = robot();
        let mut manager = manager(Arc::new(MemoryCluster::new()));
        let err = RobotAccountComposer
            .add_resources(&robot, &mut manager)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_secrets_for_existing_harbor() {
        let cluster = Arc::new(MemoryCluster::new());
        let mut harbor = Harbor::new(
            "sample",
            HarborSpec {
                harbor: EmbeddedHarborSpec {
                    external_url: "https://harbor.example.com".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        harbor.metadata.namespace = Some("registry".into());
        let (ar, obj) = crate::reconciler::manager::to_dynamic(&harbor).unwrap();
        cluster.insert(&ar, obj);

        let robot = robot();
        let mut manager = manager(cluster);
        RobotAccountComposer
            .add_resources(&robot, &mut manager)
            .await
            .unwrap();
        assert!(declares(&manager, "Harbor", "sample"));
        assert!(declares(&manager, "Secret", "ci-credentials"));
        assert!(declares(&manager, "Secret", "ci-pull-secret"));
        assert_eq!(manager.len(), 3);
    }
}
