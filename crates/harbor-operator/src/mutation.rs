//! Mutation pipeline applied to desired objects before they are written
//!
//! A pipeline is an append-only list of transformations run in
//! declaration order. Transformations only add information: keys set by an
//! earlier step are overwritten by later ones, never removed.

use crate::config::{OPERATOR_NAME, OPERATOR_VERSION};
use crate::error::{OperatorError, Result, REASON_OPERATOR_ERROR};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Label carrying the operator name
pub const LABEL_OPERATOR_CONTROLLER: &str = "goharbor.io/operator-controller";
/// Label carrying the operator version
pub const LABEL_OPERATOR_VERSION: &str = "goharbor.io/operator-version";
/// Marks generated content that must never be overwritten
pub const ANNOTATION_IMMUTABLE: &str = "goharbor.io/immutable";
/// Human readable ownership notice
pub const ANNOTATION_WARNING: &str = "goharbor.io/warning";
/// Class annotation used to share a cluster between operator instances
pub const ANNOTATION_HARBOR_CLASS: &str = "goharbor.io/harbor-class";
/// Disables the default network policies of a component
pub const ANNOTATION_NETWORK_POLICIES: &str = "goharbor.io/network-policies-annotation";

const UUID_SUFFIX: &str = "/uuid";
const VERSION_SUFFIX: &str = "/version";

/// The object a reconcile acts for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerInfo {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub generation: i64,
}

impl OwnerInfo {
    /// Controller back-reference to this owner
    pub fn controller_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// The owner seen as a dependency of its own workloads.
    ///
    /// Uses the generation rather than the resource version so status
    /// writes on the owner do not roll pods.
    pub fn as_dependency(&self) -> DependencyState {
        DependencyState {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            uid: self.uid.clone(),
            resource_version: self.generation.to_string(),
        }
    }
}

/// Observed identity of an applied or external dependency
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyState {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub resource_version: String,
}

impl DependencyState {
    /// Read the identity of a remote object.
    ///
    /// Objects with a spec generation are versioned by it, so status
    /// writes by their own controllers do not rewrite dependants. Objects
    /// without one (config maps, secrets, endpoints) use the resource version.
    pub fn from_object(obj: &DynamicObject) -> Self {
        let types = obj.types.clone().unwrap_or_default();
        let version = match obj.metadata.generation {
            Some(generation) if generation > 0 => generation.to_string(),
            _ => obj.metadata.resource_version.clone().unwrap_or_default(),
        };
        Self {
            api_version: types.api_version,
            kind: types.kind,
            name: obj.metadata.name.clone().unwrap_or_default(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            uid: obj.metadata.uid.clone().unwrap_or_default(),
            resource_version: version,
        }
    }

    /// API group, empty for core kinds
    pub fn group(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }
}

/// Build the annotation keys recording a dependency's uid and version.
///
/// Core kinds have no group; they are suffixed with `k8s.io`.
pub fn dependency_annotation_keys(
    name: &str,
    namespace: &str,
    kind: &str,
    fqdn: &str,
) -> (String, String) {
    let fqdn = if fqdn.is_empty() { "k8s.io" } else { fqdn };
    let base = format!(
        "{}.{}.{}.{}",
        name,
        namespace,
        kind.to_ascii_lowercase(),
        fqdn
    );
    (
        format!("{}{}", base, UUID_SUFFIX),
        format!("{}{}", base, VERSION_SUFFIX),
    )
}

/// Whether an annotation key belongs to the dependency annotation family
pub fn is_dependency_annotation(key: &str) -> bool {
    let Some((prefix, suffix)) = key.rsplit_once('/') else {
        return false;
    };
    if suffix != "uuid" && suffix != "version" {
        return false;
    }
    // name.namespace.kind.fqdn with at least one dot in the fqdn
    prefix.split('.').filter(|s| !s.is_empty()).count() >= 5
}

/// Runtime inputs of a mutation
pub struct MutationContext<'a> {
    pub owner: &'a OwnerInfo,
    pub dependencies: &'a [DependencyState],
}

/// One transformation step
pub type Mutation = Arc<dyn Fn(&mut DynamicObject, &MutationContext<'_>) -> Result<()> + Send + Sync>;

/// Wrap a closure as a pipeline step
pub fn mutation<F>(f: F) -> Mutation
where
    F: Fn(&mut DynamicObject, &MutationContext<'_>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered list of transformations
#[derive(Clone, Default)]
pub struct MutationPipeline {
    steps: Vec<Mutation>,
}

impl MutationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step; steps run in the order they were added
    pub fn append(mut self, step: Mutation) -> Self {
        self.steps.push(step);
        self
    }

    /// Append every step of `other` after the steps of `self`
    pub fn merge(mut self, other: MutationPipeline) -> Self {
        self.steps.extend(other.steps);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Fold every step over the object
    pub fn apply(&self, obj: &mut DynamicObject, ctx: &MutationContext<'_>) -> Result<()> {
        for step in &self.steps {
            step(obj, ctx)?;
        }
        Ok(())
    }
}

/// Set the controller owner reference, refusing to steal objects
pub fn owner_reference() -> Mutation {
    mutation(|obj, ctx| {
        let desired = ctx.owner.controller_reference();
        let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);

        if let Some(other) = refs
            .iter()
            .find(|r| r.controller == Some(true) && r.uid != desired.uid)
        {
            return Err(OperatorError::fatal(
                REASON_OPERATOR_ERROR,
                format!(
                    "{} is already controlled by {} {}",
                    obj.metadata.name.as_deref().unwrap_or_default(),
                    other.kind,
                    other.name
                ),
            ));
        }

        refs.retain(|r| r.uid != desired.uid);
        refs.push(desired);
        Ok(())
    })
}

/// Merge static annotations
pub fn annotations(values: BTreeMap<String, String>) -> Mutation {
    mutation(move |obj, _| {
        let annotations = obj.metadata.annotations.get_or_insert_with(BTreeMap::new);
        annotations.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    })
}

/// Class annotation, when the operator runs with a class
pub fn class_annotation(class: &str) -> Mutation {
    let mut values = BTreeMap::new();
    if !class.is_empty() {
        values.insert(ANNOTATION_HARBOR_CLASS.to_string(), class.to_string());
    }
    annotations(values)
}

/// Human readable "managed by" notice
pub fn warning_annotation() -> Mutation {
    annotations(BTreeMap::from([(
        ANNOTATION_WARNING.to_string(),
        format!("This resource is managed by {}, manual changes are reverted", OPERATOR_NAME),
    )]))
}

/// Operator name and version labels
pub fn operator_labels() -> Mutation {
    mutation(|obj, _| {
        let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
        labels.insert(
            LABEL_OPERATOR_CONTROLLER.to_string(),
            OPERATOR_NAME.to_string(),
        );
        labels.insert(
            LABEL_OPERATOR_VERSION.to_string(),
            format!("v{}", OPERATOR_VERSION),
        );
        Ok(())
    })
}

/// Mark generated content as immutable
pub fn immutable() -> Mutation {
    annotations(BTreeMap::from([(
        ANNOTATION_IMMUTABLE.to_string(),
        "true".to_string(),
    )]))
}

/// Record the owner and every parent as annotations
pub fn dependency_annotations() -> Mutation {
    mutation(|obj, ctx| {
        let annotations = obj.metadata.annotations.get_or_insert_with(BTreeMap::new);
        let owner = ctx.owner.as_dependency();
        for dep in std::iter::once(&owner).chain(ctx.dependencies.iter()) {
            let (uuid_key, version_key) =
                dependency_annotation_keys(&dep.name, &dep.namespace, &dep.kind, dep.group());
            annotations.insert(uuid_key, dep.uid.clone());
            annotations.insert(version_key, dep.resource_version.clone());
        }
        Ok(())
    })
}

/// Copy the object's labels and annotations onto its pod template
pub fn pod_template_propagation() -> Mutation {
    mutation(|obj, _| {
        let labels = obj.metadata.labels.clone().unwrap_or_default();
        let annotations = obj.metadata.annotations.clone().unwrap_or_default();

        let template_meta = obj
            .data
            .get_mut("spec")
            .and_then(|spec| spec.get_mut("template"))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                OperatorError::Internal(format!(
                    "{} has no pod template",
                    obj.metadata.name.as_deref().unwrap_or_default()
                ))
            })?
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));

        merge_string_map(template_meta, "labels", &labels)?;
        merge_string_map(template_meta, "annotations", &annotations)?;
        Ok(())
    })
}

fn merge_string_map(meta: &mut Value, field: &str, values: &BTreeMap<String, String>) -> Result<()> {
    let meta = meta
        .as_object_mut()
        .ok_or_else(|| OperatorError::Internal("pod template metadata is not an object".into()))?;
    let target = meta
        .entry(field)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| OperatorError::Internal(format!("pod template {} is not a map", field)))?;
    for (k, v) in values {
        target.insert(k.clone(), Value::String(v.clone()));
    }
    Ok(())
}

/// Steps every managed child receives
pub fn common_pipeline(class: &str) -> MutationPipeline {
    MutationPipeline::new()
        .append(owner_reference())
        .append(class_annotation(class))
        .append(warning_annotation())
        .append(operator_labels())
}
