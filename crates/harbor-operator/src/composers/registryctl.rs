//! Registry controller: garbage collection and health of the registry storage

use super::core::SECRET_SECRET_KEY;
use super::registry::{storage_access, CONFIG_KEY as REGISTRY_CONFIG_KEY, CONFIG_PATH as REGISTRY_CONFIG_PATH};
use super::{
    add_internal_tls, add_secret_refs, add_workload, internal_tls_env, internal_tls_path,
    storage_credentials, to_yaml, version_of, workload_status, Workload,
};
use crate::api::v1beta1::{Registry, RegistryController};
use crate::error::{OperatorError, Result};
use crate::graph::RunReport;
use crate::images::{self, Component};
use crate::readiness::ReadinessCheck;
use crate::reconciler::{Composer, ResourceManager};
use crate::resources::{
    config_map_volume, env_from_secret, http_probe, internal_tls, mount, ResourceBuilder,
};
use crate::status::ComponentStatus;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::ApiResource;
use serde_json::json;
use std::collections::BTreeMap;

const CONFIG_KEY: &str = "config.yml";
const CONFIG_PATH: &str = "/etc/registryctl";

pub struct RegistryControllerComposer;

fn configuration(controller: &RegistryController) -> Result<String> {
    let spec = &controller.spec;
    let mut config = json!({
        "protocol": if spec.tls.is_some() { "https" } else { "http" },
        "port": Component::RegistryController.port(),
        "log_level": spec.log_level,
        "registry_config": format!("{}/{}", REGISTRY_CONFIG_PATH, REGISTRY_CONFIG_KEY),
    });
    if spec.tls.is_some() {
        config["https_config"] = json!({
            "cert": internal_tls_path(Component::RegistryController, "tls.crt"),
            "key": internal_tls_path(Component::RegistryController, "tls.key"),
        });
    }
    to_yaml(&config)
}

#[async_trait]
impl Composer<RegistryController> for RegistryControllerComposer {
    async fn add_resources(
        &self,
        controller: &RegistryController,
        manager: &mut ResourceManager,
    ) -> Result<()> {
        let spec = &controller.spec;
        let version = version_of(controller);
        let builder = ResourceBuilder::new(
            controller,
            Component::RegistryController,
            &spec.component,
            &version,
        )?;
        let tls = spec.tls.is_some();
        let port = Component::RegistryController.port();

        let registry_ar = ApiResource::erase::<Registry>(&());
        let registry: Registry = match manager
            .client()
            .get(&registry_ar, manager.namespace(), &spec.registry_ref)
            .await?
        {
            Some(obj) => serde_json::from_value(serde_json::to_value(obj)?)?,
            None => {
                return Err(OperatorError::not_ready(format!(
                    "registry {} not found",
                    spec.registry_ref
                )))
            }
        };

        let config = builder.config_map(
            builder.name().to_string(),
            BTreeMap::from([(CONFIG_KEY.to_string(), configuration(controller)?)]),
        );
        let mut parents = vec![manager.add_config_map(&config, &[])?];
        // the registry configuration map is owned by the registry
        parents.push(manager.add_external(
            ApiResource::erase::<ConfigMap>(&()),
            &spec.registry_ref,
            ReadinessCheck::Always,
            &[],
        )?);
        parents.extend(add_secret_refs(
            manager,
            &[
                Some(registry.spec.http_secret_ref.as_str()),
                storage_credentials(&registry.spec.storage),
            ],
        )?);

        let (mut volumes, mut mounts, mut env) = storage_access(&registry.spec.storage);
        volumes.push(config_map_volume("config", builder.name()));
        mounts.push(mount("config", &format!("{}/{}", CONFIG_PATH, CONFIG_KEY), Some(CONFIG_KEY)));
        volumes.push(config_map_volume("registry-config", &spec.registry_ref));
        mounts.push(mount(
            "registry-config",
            &format!("{}/{}", REGISTRY_CONFIG_PATH, REGISTRY_CONFIG_KEY),
            Some(REGISTRY_CONFIG_KEY),
        ));
        env.push(env_from_secret(
            "REGISTRY_HTTP_SECRET",
            &registry.spec.http_secret_ref,
            SECRET_SECRET_KEY,
        ));

        if let Some(tls_spec) = &spec.tls {
            parents.extend(add_internal_tls(manager, Some(tls_spec))?);
            let (volume, tls_mount) =
                internal_tls(Component::RegistryController, &tls_spec.certificate_ref);
            volumes.push(volume);
            mounts.push(tls_mount);
            env.extend(internal_tls_env(Component::RegistryController));
        }

        let mut container = builder.container(images::resolve(
            Component::RegistryController,
            &version,
            &spec.component.image_options(),
        ));
        container.env = Some(env);
        container.volume_mounts = Some(mounts);
        container.liveness_probe = Some(http_probe("/api/health", port, tls));
        container.readiness_probe = Some(http_probe("/api/health", port, tls));

        add_workload(
            controller,
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

    fn finalize(
        &self,
        controller: &RegistryController,
        report: &RunReport,
        status: &mut ComponentStatus,
    ) {
        workload_status(
            report,
            controller.metadata.namespace.as_deref().unwrap_or_default(),
            controller.metadata.name.as_deref().unwrap_or_default(),
            controller.spec.component.replicas,
            status,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::common::{FileSystemStorage, StorageDriverSpec};
    use crate::api::v1beta1::{RegistryControllerSpec, RegistrySpec};
    use crate::cluster_client::MemoryCluster;
    use crate::composers::testing::declares;
    use crate::mutation::OwnerInfo;
    use std::sync::Arc;

    fn controller() -> RegistryController {
        let mut controller = RegistryController::new(
            "sample-registryctl",
            RegistryControllerSpec {
                log_level: "info".into(),
                registry_ref: "sample-registry".into(),
                ..Default::default()
            },
        );
        controller.metadata.namespace = Some("registry".into());
        controller
    }

    fn manager(cluster: Arc<MemoryCluster>) -> ResourceManager {
        ResourceManager::new(
            cluster,
            OwnerInfo {
                api_version: "goharbor.io/v1beta1".into(),
                kind: "RegistryController".into(),
                name: "sample-registryctl".into(),
                namespace: "registry".into(),
                uid: "owner-uid".into(),
                generation: 1,
            },
            "",
        )
    }

    #[tokio::test]
    async fn test_waits_for_registry() {
        let controller = controller();
        let mut manager = manager(Arc::new(MemoryCluster::new()));
        let err = RegistryControllerComposer
            .add_resources(&controller, &mut manager)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_shares_registry_storage() {
        let cluster = Arc::new(MemoryCluster::new());
        let mut registry = Registry::new(
            "sample-registry",
            RegistrySpec {
                storage: StorageDriverSpec {
                    file_system: Some(FileSystemStorage {
                        claim_name: "registry-data".into(),
                        sub_path: None,
                    }),
                    ..Default::default()
                },
                http_secret_ref: "sample-registry-http".into(),
                authentication_ref: "sample-registry-basicauth".into(),
                ..Default::default()
            },
        );
        registry.metadata.namespace = Some("registry".into());
        let (ar, obj) = crate::reconciler::manager::to_dynamic(&registry).unwrap();
        cluster.insert(&ar, obj);

        let controller = controller();
        let mut manager = manager(cluster);
        RegistryControllerComposer
            .add_resources(&controller, &mut manager)
            .await
            .unwrap();

        assert!(declares(&manager, "ConfigMap", "sample-registryctl"));
        assert!(declares(&manager, "ConfigMap", "sample-registry"));
        assert!(declares(&manager, "Secret", "sample-registry-http"));
        assert!(declares(&manager, "Deployment", "sample-registryctl"));
    }
}
