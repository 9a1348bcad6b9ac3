//! Portal: the web UI, served by nginx

use super::{add_internal_tls, add_workload, internal_tls_path, version_of, workload_status, Workload};
use crate::api::v1beta1::Portal;
use crate::error::Result;
use crate::graph::RunReport;
use crate::images::{self, Component};
use crate::reconciler::{Composer, ResourceManager};
use crate::resources::{env, http_probe, internal_tls, ResourceBuilder};
use crate::status::ComponentStatus;
use async_trait::async_trait;

pub struct PortalComposer;

#[async_trait]
impl Composer<Portal> for PortalComposer {
    async fn add_resources(&self, portal: &Portal, manager: &mut ResourceManager) -> Result<()> {
        let spec = &portal.spec;
        let version = version_of(portal);
        let builder = ResourceBuilder::new(portal, Component::Portal, &spec.component, &version)?;
        let tls = spec.tls.is_some();
        let port = Component::Portal.port();

        let mut parents = Vec::new();
        let mut container = builder.container(images::resolve(
            Component::Portal,
            &version,
            &spec.component.image_options(),
        ));
        container.liveness_probe = Some(http_probe("/", port, tls));
        container.readiness_probe = Some(http_probe("/", port, tls));

        let mut volumes = Vec::new();
        if let Some(tls_spec) = &spec.tls {
            parents.extend(add_internal_tls(manager, Some(tls_spec))?);
            let (volume, mount) = internal_tls(Component::Portal, &tls_spec.certificate_ref);
            volumes.push(volume);
            container.volume_mounts = Some(vec![mount]);
            container.env = Some(vec![
                env("TLS_CERT", internal_tls_path(Component::Portal, "tls.crt")),
                env("TLS_KEY", internal_tls_path(Component::Portal, "tls.key")),
            ]);
        }

        add_workload(
            portal,
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

    fn finalize(&self, portal: &Portal, report: &RunReport, status: &mut ComponentStatus) {
        workload_status(
            report,
            portal.metadata.namespace.as_deref().unwrap_or_default(),
            portal.metadata.name.as_deref().unwrap_or_default(),
            portal.spec.component.replicas,
            status,
        );
    }
}
