//! Dependency checksum
//!
//! Decides whether a desired child must be written. The fingerprint covers
//! the owner uid, the rendered desired object and the identity and version
//! of every declared parent. It is stored on the child as an annotation and
//! compared on the next pass.
//!
//! The owner generation is not hashed on its own. The owner fields a child
//! depends on are rendered into the desired object, so they reach the
//! content digest. Deployments also carry the owner generation as a
//! dependency annotation, which rolls their pods on every owner edit. Other
//! children are left alone when an owner edit does not touch them.

use crate::error::Result;
use crate::mutation::{
    is_dependency_annotation, DependencyState, OwnerInfo, ANNOTATION_IMMUTABLE,
};
use kube::api::DynamicObject;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Annotation holding the fingerprint of the last written version
pub const ANNOTATION_CHECKSUM: &str = "goharbor.io/checksum";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintInput<'a> {
    owner_uid: &'a str,
    content: String,
    dependencies: Vec<&'a DependencyState>,
}

/// Fingerprint of a child for one owner and dependency set
pub struct DependencyChecksum<'a> {
    owner: &'a OwnerInfo,
    dependencies: &'a [DependencyState],
}

impl<'a> DependencyChecksum<'a> {
    pub fn new(owner: &'a OwnerInfo, dependencies: &'a [DependencyState]) -> Self {
        Self {
            owner,
            dependencies,
        }
    }

    /// Digest of the desired object and its inputs, ignoring any previous stamp
    pub fn compute(&self, desired: &DynamicObject) -> Result<String> {
        let mut content = desired.clone();
        if let Some(annotations) = content.metadata.annotations.as_mut() {
            annotations.remove(ANNOTATION_CHECKSUM);
        }
        let content = hex::encode(Sha256::digest(serde_json::to_vec(&content)?));

        let mut dependencies: Vec<&DependencyState> = self.dependencies.iter().collect();
        dependencies.sort();

        let input = FingerprintInput {
            owner_uid: &self.owner.uid,
            content,
            dependencies,
        };
        Ok(hex::encode(Sha256::digest(serde_json::to_vec(&input)?)))
    }

    /// Record the fingerprint on the desired object
    pub fn stamp(&self, desired: &mut DynamicObject) -> Result<String> {
        let fingerprint = self.compute(desired)?;
        desired
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(ANNOTATION_CHECKSUM.to_string(), fingerprint.clone());
        Ok(fingerprint)
    }

    /// Whether the stamped desired object differs from the remote one
    pub fn changed(&self, remote: Option<&DynamicObject>, desired: &DynamicObject) -> bool {
        let Some(remote) = remote else {
            return true;
        };

        if is_immutable(remote) {
            return false;
        }

        if static_annotations_differ(remote, desired) {
            return true;
        }

        let recorded = remote
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_CHECKSUM));
        let wanted = desired
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_CHECKSUM));
        recorded.is_none() || recorded != wanted
    }
}

/// Whether the object is flagged as never-modify
pub fn is_immutable(obj: &DynamicObject) -> bool {
    obj.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_IMMUTABLE))
        .is_some_and(|v| v == "true")
}

fn static_annotations_differ(remote: &DynamicObject, desired: &DynamicObject) -> bool {
    let empty = Default::default();
    let remote = remote.metadata.annotations.as_ref().unwrap_or(&empty);
    let desired = desired.metadata.annotations.as_ref().unwrap_or(&empty);

    let keys: BTreeSet<&String> = remote
        .keys()
        .chain(desired.keys())
        .filter(|k| is_dependency_annotation(k))
        .collect();
    let differ = keys.into_iter().any(|k| remote.get(k) != desired.get(k));
    differ
}
