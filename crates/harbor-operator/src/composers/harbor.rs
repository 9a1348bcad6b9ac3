//! Harbor: one installation assembled from component resources
//!
//! The composer generates the shared credentials, the token and internal
//! TLS certificates, one goharbor.io child per enabled component and the
//! ingresses. Children are wired so that a component only rolls out once
//! what it talks to is ready:
//!
//! ```text
//! registry -> registryctl -> core -> jobservice
//!                                 -> exporter
//! notary-signer -> notary-server
//! ```

use super::core::{CSRF_KEY_KEY, SECRET_SECRET_KEY};
use super::notary::PASSPHRASE_KEY;
use super::scheme;
use crate::api::common::{
    ComponentSpec, ComponentsTlsSpec, PostgresConnection, RedisConnection, StorageDriverSpec,
    ANNOTATION_HARBOR_VERSION,
};
use crate::api::v1beta1::*;
use crate::api::validation;
use crate::certmanager::{Certificate, CertificateSpec, Issuer, IssuerRef, IssuerSpec};
use crate::config::{self, go_duration, OPERATOR_NAME};
use crate::error::{OperatorError, Result, REASON_INVALID_SPEC};
use crate::graph::NodeKey;
use crate::images::{self, Component, ImageOptions};
use crate::mutation::{ANNOTATION_HARBOR_CLASS, ANNOTATION_NETWORK_POLICIES};
use crate::reconciler::{Composer, ResourceManager};
use crate::resources::{
    typed_secret, IngressParams, IngressRoute, ResourceBuilder, ANNOTATION_HARBOR,
    LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_PART_OF, SECRET_TYPE_OPAQUE,
};
use crate::secrets::{
    self, SECRET_HTPASSWD_KEY, SECRET_KEY_KEY, SECRET_PASSWORD_KEY, SECRET_USERNAME_KEY,
};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::debug;

/// User the registry authenticates core and jobservice with
pub const REGISTRY_USERNAME: &str = "harbor_registry_user";
const CSRF_KEY_LENGTH: usize = 32;
const TOKEN_ISSUER: &str = "harbor-token-issuer";
const INGRESS_BODY_SIZE: &str = "nginx.ingress.kubernetes.io/proxy-body-size";
const INGRESS_BACKEND_PROTOCOL: &str = "nginx.ingress.kubernetes.io/backend-protocol";

/// Paths of the external URL served by core rather than the portal
const CORE_PATHS: [&str; 5] = ["/api/", "/service/", "/v2/", "/chartrepo/", "/c/"];

pub struct HarborComposer;

/// Backends a Harbor talks to
pub(crate) struct Backends<'a> {
    pub database: &'a PostgresConnection,
    pub redis: &'a RedisConnection,
    pub storage: &'a StorageDriverSpec,
}

/// Owner annotations children inherit
pub(crate) fn forwarded_annotations(meta: &ObjectMeta) -> BTreeMap<String, String> {
    let Some(annotations) = &meta.annotations else {
        return BTreeMap::new();
    };
    [ANNOTATION_HARBOR_CLASS, ANNOTATION_NETWORK_POLICIES]
        .into_iter()
        .filter_map(|key| annotations.get(key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

/// Names, URLs and metadata of the children of one Harbor
pub(crate) struct HarborContext<'a> {
    name: String,
    namespace: String,
    spec: &'a EmbeddedHarborSpec,
    annotations: BTreeMap<String, String>,
    tls: bool,
}

impl<'a> HarborContext<'a> {
    pub(crate) fn new(harbor: &'a Harbor) -> Self {
        let name = harbor.metadata.name.clone().unwrap_or_default();
        let mut annotations = BTreeMap::from([
            (ANNOTATION_HARBOR_VERSION.to_string(), harbor.spec.harbor.version.clone()),
            (ANNOTATION_HARBOR.to_string(), name.clone()),
        ]);
        annotations.extend(forwarded_annotations(&harbor.metadata));
        HarborContext {
            namespace: harbor.metadata.namespace.clone().unwrap_or_default(),
            spec: &harbor.spec.harbor,
            tls: harbor.spec.harbor.internal_tls.enabled,
            annotations,
            name,
        }
    }

    fn child(&self, suffix: &str) -> String {
        format!("{}-{}", self.name, suffix)
    }

    fn component_name(&self, component: Component) -> String {
        self.child(component.name())
    }

    fn url(&self, component: Component) -> String {
        format!("{}://{}", scheme(self.tls), self.component_name(component))
    }

    fn service_port(&self) -> i32 {
        if self.tls {
            443
        } else {
            80
        }
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
            (LABEL_PART_OF.to_string(), "harbor".to_string()),
            (LABEL_INSTANCE.to_string(), self.name.clone()),
        ])
    }

    fn meta(&self, name: String) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }

    fn component_meta(&self, component: Component) -> ObjectMeta {
        let mut meta = self.meta(self.component_name(component));
        meta.annotations = Some(self.annotations.clone());
        meta
    }

    /// Component settings with the image source applied
    fn component_spec(&self, spec: Option<&ComponentSpec>, component: Component) -> ComponentSpec {
        let mut spec = spec.cloned().unwrap_or_default();
        let Some(source) = &self.spec.image_source else {
            return spec;
        };
        if source.repository.is_some() || source.tag_suffix.is_some() {
            spec.image = Some(images::resolve(
                component,
                &self.spec.version,
                &ImageOptions {
                    image: spec.image.as_deref(),
                    repository: source.repository.as_deref(),
                    tag_suffix: source.tag_suffix.as_deref(),
                },
            ));
        }
        if spec.image_pull_policy.is_none() {
            spec.image_pull_policy = source.image_pull_policy.clone();
        }
        if spec.image_pull_secrets.is_empty() {
            spec.image_pull_secrets = source.image_pull_secrets.clone();
        }
        spec
    }

    fn internal_certificate(&self, component: Component) -> String {
        self.child(&format!("{}-internal-tls", component.name()))
    }

    fn component_tls(&self, component: Component) -> Option<ComponentsTlsSpec> {
        self.tls.then(|| ComponentsTlsSpec {
            certificate_ref: self.internal_certificate(component),
        })
    }

    fn enabled(&self) -> Vec<Component> {
        let mut components = vec![
            Component::Core,
            Component::Portal,
            Component::Registry,
            Component::RegistryController,
            Component::JobService,
        ];
        if self.spec.chartmuseum.is_some() {
            components.push(Component::ChartMuseum);
        }
        if self.spec.trivy.is_some() {
            components.push(Component::Trivy);
        }
        if self.spec.notary.is_some() {
            components.push(Component::NotaryServer);
            components.push(Component::NotarySigner);
        }
        if self.spec.exporter.is_some() {
            components.push(Component::Exporter);
        }
        components
    }
}

/// Secrets shared by the components, generated or user provided
struct SharedSecrets {
    core_secret: NodeKey,
    csrf_key: NodeKey,
    encryption_key: (String, NodeKey),
    admin_password: (String, NodeKey),
    registry_http: NodeKey,
    registry_basic_auth: NodeKey,
    jobservice_secret: NodeKey,
    signer_alias: Option<NodeKey>,
}

fn password_budget() -> config::PasswordBudget {
    config::with(|c| c.password_budget)
}

/// Immutable secret whose values survive across passes
async fn add_generated_secret(
    manager: &mut ResourceManager,
    ctx: &HarborContext<'_>,
    name: String,
    key: &str,
    generate: impl FnOnce() -> Result<String> + Send,
) -> Result<NodeKey> {
    let value = manager.secret_value_or(&name, key, generate).await?;
    let secret = typed_secret(
        ctx.meta(name),
        SECRET_TYPE_OPAQUE,
        BTreeMap::from([(key.to_string(), value)]),
    );
    manager.add_immutable_secret(&secret, &[])
}

async fn add_shared_secrets(
    manager: &mut ResourceManager,
    ctx: &HarborContext<'_>,
) -> Result<SharedSecrets> {
    let budget = password_budget();
    let core_secret = add_generated_secret(manager, ctx, ctx.child("core-secret"), SECRET_SECRET_KEY, || {
        secrets::generate(budget)
    })
    .await?;
    let csrf_key = add_generated_secret(manager, ctx, ctx.child("core-csrf"), CSRF_KEY_KEY, || {
        secrets::generate(config::PasswordBudget::new(CSRF_KEY_LENGTH, 4, 0))
    })
    .await?;

    let encryption_key = match ctx.spec.encryption_key_ref.as_deref() {
        Some(secret) => (secret.to_string(), manager.add_secret_dependency(secret)?),
        None => {
            let name = ctx.child("core-encryptionkey");
            let key = add_generated_secret(manager, ctx, name.clone(), SECRET_KEY_KEY, secrets::generate_encryption_key).await?;
            (name, key)
        }
    };
    let admin_password = match ctx.spec.harbor_admin_password_ref.as_deref() {
        Some(secret) => (secret.to_string(), manager.add_secret_dependency(secret)?),
        None => {
            let name = ctx.child("harbor-admin-password");
            let key = add_generated_secret(manager, ctx, name.clone(), SECRET_PASSWORD_KEY, || {
                secrets::generate(budget)
            })
            .await?;
            (name, key)
        }
    };

    let registry_http = add_generated_secret(manager, ctx, ctx.child("registry-http"), SECRET_SECRET_KEY, || {
        secrets::generate(budget)
    })
    .await?;

    // password and htpasswd line must agree, keep both once written
    let basic_auth_name = ctx.child("registry-basicauth");
    let password = manager
        .secret_value_or(&basic_auth_name, SECRET_PASSWORD_KEY, || secrets::generate(budget))
        .await?;
    let htpasswd = match manager
        .existing_secret_value(&basic_auth_name, SECRET_HTPASSWD_KEY)
        .await?
    {
        Some(line) => line,
        None => secrets::htpasswd(
            REGISTRY_USERNAME,
            &password,
            config::with(|c| c.htpasswd_cost),
        )?,
    };
    let basic_auth = typed_secret(
        ctx.meta(basic_auth_name),
        SECRET_TYPE_OPAQUE,
        BTreeMap::from([
            (SECRET_USERNAME_KEY.to_string(), REGISTRY_USERNAME.to_string()),
            (SECRET_PASSWORD_KEY.to_string(), password),
            (SECRET_HTPASSWD_KEY.to_string(), htpasswd),
        ]),
    );
    let registry_basic_auth = manager.add_immutable_secret(&basic_auth, &[])?;

    let jobservice_secret = add_generated_secret(manager, ctx, ctx.child("jobservice-secret"), SECRET_SECRET_KEY, || {
        secrets::generate(budget)
    })
    .await?;

    let signer_alias = if ctx.spec.notary.is_some() {
        Some(
            add_generated_secret(manager, ctx, ctx.child("notary-signer-alias"), PASSPHRASE_KEY, || {
                secrets::generate(budget)
            })
            .await?,
        )
    } else {
        None
    };

    Ok(SharedSecrets {
        core_secret,
        csrf_key,
        encryption_key,
        admin_password,
        registry_http,
        registry_basic_auth,
        jobservice_secret,
        signer_alias,
    })
}

fn certificate(
    ctx: &HarborContext<'_>,
    name: String,
    issuer: &str,
    spec: CertificateSpec,
) -> Certificate {
    let durations = config::with(|c| c.internal_tls);
    let mut certificate = Certificate::new(
        &name,
        CertificateSpec {
            secret_name: name.clone(),
            issuer_ref: IssuerRef::issuer(issuer),
            duration: Some(go_duration(durations.duration)),
            renew_before: Some(go_duration(durations.renew_before)),
            ..spec
        },
    );
    certificate.metadata = ctx.meta(name);
    certificate
}

fn issuer(ctx: &HarborContext<'_>, name: String, spec: IssuerSpec) -> Issuer {
    let mut issuer = Issuer::new(&name, spec);
    issuer.metadata = ctx.meta(name);
    issuer
}

/// Issuers and certificates: the token certificate always, the internal
/// chain when internal TLS is on. Returns the TLS secret keys by component.
fn add_certificates(
    manager: &mut ResourceManager,
    ctx: &HarborContext<'_>,
) -> Result<(NodeKey, BTreeMap<Component, NodeKey>)> {
    let self_signed_name = ctx.child("self-signed");
    let self_signed = manager.add_issuer(
        &issuer(ctx, self_signed_name.clone(), IssuerSpec::self_signed()),
        &[],
    )?;

    let token_name = ctx.child("token");
    let token_certificate = manager.add_certificate(
        &certificate(
            ctx,
            token_name.clone(),
            &self_signed_name,
            CertificateSpec {
                common_name: Some(TOKEN_ISSUER.to_string()),
                ..Default::default()
            },
        ),
        std::slice::from_ref(&self_signed),
    )?;
    let token = manager.add_tls_secret(&token_name, &[token_certificate])?;

    let (leaf_issuer, leaf_issuer_key) = if ctx.tls {
        let ca_name = ctx.child("ca");
        let ca_certificate = manager.add_certificate(
            &certificate(
                ctx,
                ca_name.clone(),
                &self_signed_name,
                CertificateSpec {
                    common_name: Some(format!("{} internal CA", ctx.name)),
                    is_ca: Some(true),
                    ..Default::default()
                },
            ),
            std::slice::from_ref(&self_signed),
        )?;
        let ca_secret = manager.add_tls_secret(&ca_name, &[ca_certificate])?;
        let ca_issuer = manager.add_issuer(&issuer(ctx, ca_name.clone(), IssuerSpec::ca(&ca_name)), &[ca_secret])?;
        (ca_name, ca_issuer)
    } else {
        (self_signed_name, self_signed)
    };

    let mut secrets = BTreeMap::new();
    for component in ctx.enabled() {
        // the signer serves gRPC over TLS whether or not internal TLS is on
        if !ctx.tls && component != Component::NotarySigner {
            continue;
        }
        let name = ctx.internal_certificate(component);
        let service = ctx.component_name(component);
        let key = manager.add_certificate(
            &certificate(
                ctx,
                name.clone(),
                &leaf_issuer,
                CertificateSpec {
                    common_name: Some(service.clone()),
                    dns_names: vec![
                        service.clone(),
                        format!("{}.{}", service, ctx.namespace),
                        format!("{}.{}.svc", service, ctx.namespace),
                    ],
                    usages: vec!["server auth".to_string(), "client auth".to_string()],
                    ..Default::default()
                },
            ),
            std::slice::from_ref(&leaf_issuer_key),
        )?;
        secrets.insert(component, manager.add_tls_secret(&name, &[key])?);
    }
    Ok((token, secrets))
}

fn notary_database(database: &PostgresConnection, suffix: &str) -> PostgresConnection {
    PostgresConnection {
        database: Some(match &database.database {
            Some(prefix) => format!("{}-{}", prefix, suffix),
            None => suffix.to_string(),
        }),
        ..database.clone()
    }
}

/// Declare the children of a Harbor installation
pub(crate) async fn compose(
    manager: &mut ResourceManager,
    harbor: &Harbor,
    backends: Backends<'_>,
) -> Result<()> {
    let ctx = HarborContext::new(harbor);
    let spec = ctx.spec;
    let log_level = spec.log_level.clone();

    let shared = add_shared_secrets(manager, &ctx).await?;
    let (token, tls_secrets) = add_certificates(manager, &ctx)?;
    let tls_parent = |component: Component| tls_secrets.get(&component).cloned();
    let with_tls = |mut parents: Vec<NodeKey>, component: Component| {
        parents.extend(tls_parent(component));
        parents
    };

    let registry = Registry {
        metadata: ctx.component_meta(Component::Registry),
        spec: RegistrySpec {
            component: ctx.component_spec(spec.registry.as_ref(), Component::Registry),
            log_level: log_level.clone(),
            storage: backends.storage.clone(),
            http_secret_ref: ctx.child("registry-http"),
            authentication_ref: ctx.child("registry-basicauth"),
            redis: Some(backends.redis.clone()),
            tls: ctx.component_tls(Component::Registry),
            metrics: None,
            proxy: spec.proxy.clone(),
        },
        status: None,
    };
    let registry_key = manager.add_component(
        &registry,
        &with_tls(
            vec![shared.registry_http.clone(), shared.registry_basic_auth.clone()],
            Component::Registry,
        ),
    )?;

    let registryctl = RegistryController {
        metadata: ctx.component_meta(Component::RegistryController),
        spec: RegistryControllerSpec {
            component: ctx.component_spec(
                spec.registry_controller.as_ref(),
                Component::RegistryController,
            ),
            log_level: log_level.clone(),
            registry_ref: ctx.component_name(Component::Registry),
            tls: ctx.component_tls(Component::RegistryController),
        },
        status: None,
    };
    let registryctl_key = manager.add_component(
        &registryctl,
        &with_tls(vec![registry_key], Component::RegistryController),
    )?;

    let portal = Portal {
        metadata: ctx.component_meta(Component::Portal),
        spec: PortalSpec {
            component: ctx.component_spec(spec.portal.as_ref(), Component::Portal),
            tls: ctx.component_tls(Component::Portal),
        },
        status: None,
    };
    let portal_key = manager.add_component(&portal, &with_tls(Vec::new(), Component::Portal))?;

    if let Some(chartmuseum) = &spec.chartmuseum {
        let chart_base = if chartmuseum.absolute_url {
            spec.external_url.trim_end_matches('/').to_string()
        } else {
            ctx.url(Component::Core)
        };
        let resource = ChartMuseum {
            metadata: ctx.component_meta(Component::ChartMuseum),
            spec: ChartMuseumSpec {
                component: ctx.component_spec(Some(&chartmuseum.component), Component::ChartMuseum),
                log_level: log_level.clone(),
                storage: backends.storage.clone(),
                chart_url: format!("{}/chartrepo", chart_base),
                cache: Some(backends.redis.clone()),
                tls: ctx.component_tls(Component::ChartMuseum),
            },
            status: None,
        };
        manager.add_component(&resource, &with_tls(Vec::new(), Component::ChartMuseum))?;
    }

    if let Some(trivy) = &spec.trivy {
        let resource = Trivy {
            metadata: ctx.component_meta(Component::Trivy),
            spec: TrivySpec {
                component: ctx.component_spec(Some(&trivy.component), Component::Trivy),
                log_level: log_level.clone(),
                redis: backends.redis.clone(),
                github_token_ref: trivy.github_token_ref.clone(),
                skip_update: trivy.skip_update,
                offline_scan: trivy.offline_scan,
                severity: None,
                storage: trivy.storage.clone(),
                tls: ctx.component_tls(Component::Trivy),
                proxy: spec.proxy.clone(),
            },
            status: None,
        };
        manager.add_component(&resource, &with_tls(Vec::new(), Component::Trivy))?;
    }

    let notary_host = spec
        .expose
        .notary
        .as_ref()
        .and_then(|expose| expose.ingress.as_ref())
        .map(|ingress| ingress.host.clone());
    if let Some(notary) = &spec.notary {
        let signer_certificate = ctx.internal_certificate(Component::NotarySigner);
        let signer = NotarySigner {
            metadata: ctx.component_meta(Component::NotarySigner),
            spec: NotarySignerSpec {
                component: ctx.component_spec(Some(&notary.signer), Component::NotarySigner),
                log_level: log_level.clone(),
                storage: notary_database(backends.database, "notarysigner"),
                authentication_ref: signer_certificate.clone(),
                default_alias_ref: ctx.child("notary-signer-alias"),
                migration_enabled: notary.migration_enabled,
            },
            status: None,
        };
        let mut signer_parents = with_tls(Vec::new(), Component::NotarySigner);
        signer_parents.extend(shared.signer_alias.clone());
        let signer_key = manager.add_component(&signer, &signer_parents)?;

        let server = NotaryServer {
            metadata: ctx.component_meta(Component::NotaryServer),
            spec: NotaryServerSpec {
                component: ctx.component_spec(Some(&notary.server), Component::NotaryServer),
                log_level: log_level.clone(),
                storage: notary_database(backends.database, "notaryserver"),
                signer_address: format!(
                    "{}:{}",
                    ctx.component_name(Component::NotarySigner),
                    Component::NotarySigner.port()
                ),
                signer_certificate_ref: signer_certificate,
                auth: NotaryAuthSpec {
                    realm: format!("{}/service/token", spec.external_url.trim_end_matches('/')),
                    certificate_ref: ctx.child("token"),
                },
                migration_enabled: notary.migration_enabled,
                tls: ctx.component_tls(Component::NotaryServer),
            },
            status: None,
        };
        manager.add_component(
            &server,
            &with_tls(vec![signer_key, token.clone()], Component::NotaryServer),
        )?;
    }

    let core = Core {
        metadata: ctx.component_meta(Component::Core),
        spec: CoreSpec {
            component: ctx.component_spec(spec.core.as_ref(), Component::Core),
            log_level: log_level.clone(),
            external_endpoint: spec.external_url.clone(),
            database: backends.database.clone(),
            redis: backends.redis.clone(),
            secret_ref: ctx.child("core-secret"),
            encryption_key_ref: shared.encryption_key.0.clone(),
            csrf_key_ref: ctx.child("core-csrf"),
            admin_initial_password_ref: shared.admin_password.0.clone(),
            token_issuer_ref: ctx.child("token"),
            components: CoreComponentsSpec {
                registry_url: ctx.url(Component::Registry),
                registry_controller_url: ctx.url(Component::RegistryController),
                registry_credentials_ref: ctx.child("registry-basicauth"),
                jobservice_url: ctx.url(Component::JobService),
                jobservice_secret_ref: ctx.child("jobservice-secret"),
                portal_url: ctx.url(Component::Portal),
                chartmuseum_url: spec
                    .chartmuseum
                    .as_ref()
                    .map(|_| ctx.url(Component::ChartMuseum)),
                trivy_url: spec.trivy.as_ref().map(|_| ctx.url(Component::Trivy)),
                notary_url: spec
                    .notary
                    .as_ref()
                    .and(notary_host.as_ref())
                    .map(|host| format!("https://{}", host)),
            },
            tls: ctx.component_tls(Component::Core),
            metrics: None,
            proxy: spec.proxy.clone(),
        },
        status: None,
    };
    let core_key = manager.add_component(
        &core,
        &with_tls(
            vec![
                registryctl_key,
                token.clone(),
                shared.core_secret.clone(),
                shared.csrf_key.clone(),
                shared.encryption_key.1.clone(),
                shared.admin_password.1.clone(),
                shared.registry_basic_auth.clone(),
                shared.jobservice_secret.clone(),
            ],
            Component::Core,
        ),
    )?;

    let jobservice_spec = spec.jobservice.clone().unwrap_or_default();
    let jobservice = JobService {
        metadata: ctx.component_meta(Component::JobService),
        spec: JobServiceSpec {
            component: ctx.component_spec(Some(&jobservice_spec.component), Component::JobService),
            log_level: log_level.clone(),
            core_url: ctx.url(Component::Core),
            secret_ref: ctx.child("jobservice-secret"),
            core_secret_ref: ctx.child("core-secret"),
            registry_credentials_ref: ctx.child("registry-basicauth"),
            redis: backends.redis.clone(),
            workers: jobservice_spec.workers.unwrap_or(10),
            logs_claim_name: jobservice_spec.logs_claim_name.clone(),
            tls: ctx.component_tls(Component::JobService),
            metrics: None,
            proxy: spec.proxy.clone(),
        },
        status: None,
    };
    // jobservice and exporter reach core by URL; a core edit must not rewrite them
    manager.add_component(
        &jobservice,
        &with_tls(
            vec![
                shared.jobservice_secret.clone(),
                shared.core_secret.clone(),
                shared.registry_basic_auth.clone(),
            ],
            Component::JobService,
        ),
    )?;

    if let Some(exporter) = &spec.exporter {
        let resource = Exporter {
            metadata: ctx.component_meta(Component::Exporter),
            spec: ExporterSpec {
                component: ctx.component_spec(Some(exporter), Component::Exporter),
                log_level: log_level.clone(),
                core_url: ctx.url(Component::Core),
                database: backends.database.clone(),
                cache_duration_seconds: None,
                tls: ctx.component_tls(Component::Exporter),
            },
            status: None,
        };
        manager.add_component(&resource, &with_tls(Vec::new(), Component::Exporter))?;
    }

    add_ingresses(manager, harbor, &ctx, &[core_key, portal_key])?;
    debug!(harbor = %ctx.name, children = manager.len(), "harbor composed");
    Ok(())
}

fn add_ingresses(
    manager: &mut ResourceManager,
    harbor: &Harbor,
    ctx: &HarborContext<'_>,
    parents: &[NodeKey],
) -> Result<()> {
    let expose = &ctx.spec.expose;
    let port = ctx.service_port();
    let default_spec = ComponentSpec::default();

    if let Some(ingress) = &expose.core.ingress {
        let builder = ResourceBuilder::new(harbor, Component::Core, &default_spec, &ctx.spec.version)?;
        let mut ingress_parents = parents.to_vec();
        let tls_secret = expose.core.tls.as_ref().map(|tls| tls.certificate_ref.as_str());
        if let Some(secret) = tls_secret {
            ingress_parents.push(manager.add_tls_secret(secret, &[])?);
        }

        let core_service = ctx.component_name(Component::Core);
        let portal_service = ctx.component_name(Component::Portal);
        let mut routes: Vec<IngressRoute<'_>> = CORE_PATHS
            .iter()
            .map(|&path| IngressRoute {
                path,
                service: &core_service,
                port,
            })
            .collect();
        routes.push(IngressRoute {
            path: "/",
            service: &portal_service,
            port,
        });

        let annotations = ingress_annotations(ctx, &ingress.annotations);
        let name = ctx.child("core");
        let resource = builder.ingress(IngressParams {
            name: &name,
            host: &ingress.host,
            class: ingress.ingress_class_name.as_deref(),
            annotations: &annotations,
            tls_secret,
            routes: &routes,
        });
        manager.add_ingress(&resource, &ingress_parents)?;
    }

    if ctx.spec.notary.is_some() {
        let Some(expose) = &expose.notary else {
            return Ok(());
        };
        let Some(ingress) = &expose.ingress else {
            return Ok(());
        };
        let builder =
            ResourceBuilder::new(harbor, Component::NotaryServer, &default_spec, &ctx.spec.version)?;
        let tls_secret = expose.tls.as_ref().map(|tls| tls.certificate_ref.as_str());
        let mut ingress_parents = Vec::new();
        if let Some(secret) = tls_secret {
            ingress_parents.push(manager.add_tls_secret(secret, &[])?);
        }
        let service = ctx.component_name(Component::NotaryServer);
        let routes = [IngressRoute {
            path: "/",
            service: &service,
            port,
        }];
        let annotations = ingress_annotations(ctx, &ingress.annotations);
        let name = ctx.child("notary");
        let resource = builder.ingress(IngressParams {
            name: &name,
            host: &ingress.host,
            class: ingress.ingress_class_name.as_deref(),
            annotations: &annotations,
            tls_secret,
            routes: &routes,
        });
        manager.add_ingress(&resource, &ingress_parents)?;
    }
    Ok(())
}

fn ingress_annotations(
    ctx: &HarborContext<'_>,
    user: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::from([(INGRESS_BODY_SIZE.to_string(), "0".to_string())]);
    if ctx.tls {
        annotations.insert(INGRESS_BACKEND_PROTOCOL.to_string(), "HTTPS".to_string());
    }
    annotations.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
    annotations
}

#[async_trait]
impl Composer<Harbor> for HarborComposer {
    async fn add_resources(&self, harbor: &Harbor, manager: &mut ResourceManager) -> Result<()> {
        let errors = validation::harbor_errors(&harbor.spec);
        if !errors.is_empty() {
            return Err(OperatorError::fatal(
                REASON_INVALID_SPEC,
                validation::summarize(&errors),
            ));
        }
        compose(
            manager,
            harbor,
            Backends {
                database: &harbor.spec.database,
                redis: &harbor.spec.redis,
                storage: &harbor.spec.image_chart_storage,
            },
        )
        .await
    }
}
