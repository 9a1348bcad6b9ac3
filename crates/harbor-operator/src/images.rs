//! Component image resolution

use crate::config;

/// Harbor components with an image of their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    Core,
    JobService,
    Portal,
    Registry,
    RegistryController,
    ChartMuseum,
    Trivy,
    NotaryServer,
    NotarySigner,
    Exporter,
}

impl Component {
    /// Short name used in configuration keys and resource names
    pub fn name(&self) -> &'static str {
        match self {
            Component::Core => "core",
            Component::JobService => "jobservice",
            Component::Portal => "portal",
            Component::Registry => "registry",
            Component::RegistryController => "registryctl",
            Component::ChartMuseum => "chartmuseum",
            Component::Trivy => "trivy",
            Component::NotaryServer => "notary-server",
            Component::NotarySigner => "notary-signer",
            Component::Exporter => "exporter",
        }
    }

    /// Upstream image repository name
    pub fn image_name(&self) -> &'static str {
        match self {
            Component::Core => "harbor-core",
            Component::JobService => "harbor-jobservice",
            Component::Portal => "harbor-portal",
            Component::Registry => "registry-photon",
            Component::RegistryController => "harbor-registryctl",
            Component::ChartMuseum => "chartmuseum-photon",
            Component::Trivy => "trivy-adapter-photon",
            Component::NotaryServer => "notary-server-photon",
            Component::NotarySigner => "notary-signer-photon",
            Component::Exporter => "harbor-exporter",
        }
    }

    /// Main container port
    pub fn port(&self) -> i32 {
        match self {
            Component::Registry => 5000,
            Component::ChartMuseum => 9999,
            Component::NotaryServer => 4443,
            Component::NotarySigner => 7899,
            _ => 8080,
        }
    }

    /// Every component
    pub fn all() -> [Component; 10] {
        [
            Component::Core,
            Component::JobService,
            Component::Portal,
            Component::Registry,
            Component::RegistryController,
            Component::ChartMuseum,
            Component::Trivy,
            Component::NotaryServer,
            Component::NotarySigner,
            Component::Exporter,
        ]
    }
}

/// Optional user overrides carried by a spec
#[derive(Debug, Clone, Default)]
pub struct ImageOptions<'a> {
    /// Image set directly on the component
    pub image: Option<&'a str>,
    /// Repository prefix from `spec.imageSource.repository`
    pub repository: Option<&'a str>,
    /// Suffix appended to the tag from `spec.imageSource.tagSuffix`
    pub tag_suffix: Option<&'a str>,
}

/// Resolve the image for a component at a Harbor version.
///
/// Precedence: the component's own image, then the operator configuration
/// override, then `<repository>/<image>:v<version><suffix>`.
pub fn resolve(component: Component, version: &str, options: &ImageOptions<'_>) -> String {
    if let Some(image) = options.image.filter(|i| !i.is_empty()) {
        return image.to_string();
    }

    let version = version.trim_start_matches('v');
    let (overrides, registry) = config::with(|c| {
        (
            c.images.get(component.name()).cloned().unwrap_or_default(),
            c.image_registry.clone(),
        )
    });

    let repository = match (options.repository, overrides.repository) {
        (Some(repo), _) if !repo.is_empty() => {
            format!("{}/{}", repo.trim_end_matches('/'), component.image_name())
        }
        (_, Some(repo)) => repo,
        _ => format!("{}/{}", registry.trim_end_matches('/'), component.image_name()),
    };

    let tag = overrides.tag.unwrap_or_else(|| format!("v{}", version));
    let suffix = options.tag_suffix.unwrap_or_default();

    format!("{}:{}{}", repository, tag, suffix)
}
