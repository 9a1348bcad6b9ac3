//! Removal of children that are no longer declared

use super::manager::ResourceManager;
use crate::api;
use crate::certmanager::{Certificate, Issuer};
use crate::error::Result;
use crate::graph::NodeKey;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use kube::core::{ApiResource, DynamicObject};
use tracing::debug;

/// Kinds a composer may create and the sweep may therefore delete
pub fn deletable_kinds() -> Vec<ApiResource> {
    let mut kinds = vec![
        ApiResource::erase::<Service>(&()),
        ApiResource::erase::<ConfigMap>(&()),
        ApiResource::erase::<Ingress>(&()),
        ApiResource::erase::<Secret>(&()),
        ApiResource::erase::<Certificate>(&()),
        ApiResource::erase::<Deployment>(&()),
        ApiResource::erase::<NetworkPolicy>(&()),
        ApiResource::erase::<Issuer>(&()),
    ];
    kinds.extend(api::api_resources());
    kinds
}

fn controlled_by(obj: &DynamicObject, uid: &str) -> bool {
    obj.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| r.controller == Some(true) && r.uid == uid)
}

/// Schedule a delete node for every object of `kinds` controlled by the
/// owner and absent from the graph. Returns the scheduled keys.
pub async fn schedule(manager: &mut ResourceManager, kinds: &[ApiResource]) -> Result<Vec<NodeKey>> {
    let client = manager.client();
    let namespace = manager.namespace().to_string();
    let uid = manager.owner().uid.clone();

    let mut scheduled = Vec::new();
    for ar in kinds {
        for obj in client.list(ar, &namespace).await? {
            if !controlled_by(&obj, &uid) {
                continue;
            }
            let Some(name) = obj.metadata.name.as_deref() else {
                continue;
            };
            let key = NodeKey::new(ar.api_version.clone(), ar.kind.clone(), &namespace, name);
            if manager.is_declared(&key) {
                continue;
            }
            debug!(resource = %key, "Scheduling removal of undeclared child");
            scheduled.push(manager.add_delete(ar.clone(), name)?);
        }
    }
    Ok(scheduled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_client::MemoryCluster;
    use crate::mutation::OwnerInfo;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn owner() -> OwnerInfo {
        OwnerInfo {
            api_version: "goharbor.io/v1beta1".into(),
            kind: "Harbor".into(),
            name: "sample".into(),
            namespace: "registry".into(),
            uid: "owner-uid".into(),
            generation: 1,
        }
    }

    fn config_map(name: &str, controller_uid: Option<&str>) -> DynamicObject {
        let mut value = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "registry"},
            "data": {}
        });
        if let Some(uid) = controller_uid {
            value["metadata"]["ownerReferences"] = json!([{
                "apiVersion": "goharbor.io/v1beta1",
                "kind": "Harbor",
                "name": "sample",
                "uid": uid,
                "controller": true
            }]);
        }
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_only_undeclared_owned_children_are_removed() {
        let cluster = Arc::new(MemoryCluster::new());
        let ar = ApiResource::erase::<ConfigMap>(&());
        cluster.insert(&ar, config_map("kept", Some("owner-uid")));
        cluster.insert(&ar, config_map("stale", Some("owner-uid")));
        cluster.insert(&ar, config_map("foreign", Some("other-uid")));
        cluster.insert(&ar, config_map("unowned", None));

        let mut manager = ResourceManager::new(cluster.clone(), owner(), "");
        let kept: k8s_openapi::api::core::v1::ConfigMap =
            serde_json::from_value(json!({"metadata": {"name": "kept", "namespace": "registry"}}))
                .unwrap();
        manager.add_config_map(&kept, &[]).unwrap();

        let scheduled = schedule(&mut manager, &deletable_kinds()).await.unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].name, "stale");

        manager.run(&CancellationToken::new()).await.into_result().unwrap();
        assert!(cluster.object(&ar, "registry", "stale").is_none());
        assert!(cluster.object(&ar, "registry", "foreign").is_some());
        assert!(cluster.object(&ar, "registry", "unowned").is_some());
        assert_eq!(cluster.deletes(), 1);
    }
}
