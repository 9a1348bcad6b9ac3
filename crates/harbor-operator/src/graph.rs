//! Resource dependency graph
//!
//! Nodes are child resources keyed by kind, namespace and name. Each node
//! owns a processor and a list of parents. Running the graph launches every
//! node as its own task; a node first waits for one completion signal per
//! parent on a channel sized to its parent count, then runs its processor
//! and forwards the outcome to each of its children. No topological sort is
//! needed and independent branches run in parallel.

use crate::error::{OperatorError, Result};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Outcome of a single node, shared with every descendant on failure
pub type NodeResult = std::result::Result<(), Arc<OperatorError>>;

/// Work attached to a node. Reusable so the graph can run more than once.
pub type Processor = Arc<dyn Fn() -> BoxFuture<'static, NodeResult> + Send + Sync>;

/// Identity of a node in the graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl NodeKey {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// API group of the node, empty for the core group
    pub fn group(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {}/{}",
            self.api_version, self.kind, self.namespace, self.name
        )
    }
}

struct Node {
    parents: Vec<NodeKey>,
    children: Vec<NodeKey>,
    processor: Processor,
}

/// Per-node outcomes of one run
#[derive(Default)]
pub struct RunReport {
    /// Outcome of every node, including propagated parent failures
    pub outcomes: BTreeMap<NodeKey, NodeResult>,
    /// First error observed, in completion order
    pub first_error: Option<Arc<OperatorError>>,
}

impl RunReport {
    /// Whether the node ran its processor successfully
    pub fn succeeded(&self, key: &NodeKey) -> bool {
        matches!(self.outcomes.get(key), Some(Ok(())))
    }

    /// Collapse the report into the first error
    pub fn into_result(self) -> Result<()> {
        match self.first_error {
            Some(err) => Err(OperatorError::Shared(err)),
            None => Ok(()),
        }
    }
}

/// Directed acyclic graph of resources
#[derive(Default)]
pub struct ResourceGraph {
    nodes: BTreeMap<NodeKey, Node>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Parents must already be present, which also rules out cycles.
    pub fn add_resource(
        &mut self,
        key: NodeKey,
        parents: &[NodeKey],
        processor: Processor,
    ) -> Result<()> {
        if self.nodes.contains_key(&key) {
            return Err(OperatorError::DuplicateResource(key.to_string()));
        }

        let mut unique_parents: Vec<NodeKey> = Vec::with_capacity(parents.len());
        for parent in parents {
            if !self.nodes.contains_key(parent) {
                return Err(OperatorError::UnknownParent {
                    child: key.to_string(),
                    parent: parent.to_string(),
                });
            }
            if !unique_parents.contains(parent) {
                unique_parents.push(parent.clone());
            }
        }

        for parent in &unique_parents {
            if let Some(node) = self.nodes.get_mut(parent) {
                node.children.push(key.clone());
            }
        }

        trace!(node = %key, parents = unique_parents.len(), "Adding resource to graph");

        self.nodes.insert(
            key,
            Node {
                parents: unique_parents,
                children: Vec::new(),
                processor,
            },
        );
        Ok(())
    }

    /// All nodes currently declared
    pub fn get_all_resources(&self) -> Vec<&NodeKey> {
        self.nodes.keys().collect()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Declared parents of a node
    pub fn parents(&self, key: &NodeKey) -> &[NodeKey] {
        self.nodes
            .get(key)
            .map(|n| n.parents.as_slice())
            .unwrap_or(&[])
    }

    /// Run every processor, returning the first error
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        self.run_with_report(cancel).await.into_result()
    }

    /// Run every processor and collect per-node outcomes.
    ///
    /// Channels are rebuilt from the stored edges on every call.
    pub async fn run_with_report(&self, cancel: &CancellationToken) -> RunReport {
        let mut senders: BTreeMap<NodeKey, mpsc::Sender<NodeResult>> = BTreeMap::new();
        let mut receivers: BTreeMap<NodeKey, mpsc::Receiver<NodeResult>> = BTreeMap::new();
        for (key, node) in &self.nodes {
            let (tx, rx) = mpsc::channel(node.parents.len().max(1));
            senders.insert(key.clone(), tx);
            receivers.insert(key.clone(), rx);
        }

        let mut tasks = JoinSet::new();
        for (key, node) in &self.nodes {
            let Some(mut rx) = receivers.remove(key) else {
                continue;
            };
            let children: Vec<mpsc::Sender<NodeResult>> = node
                .children
                .iter()
                .filter_map(|child| senders.get(child).cloned())
                .collect();
            let expected = node.parents.len();
            let processor = node.processor.clone();
            let cancel = cancel.clone();
            let key = key.clone();

            tasks.spawn(async move {
                let mut failure: Option<Arc<OperatorError>> = None;

                for _ in 0..expected {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            failure = Some(Arc::new(OperatorError::Cancelled));
                            break;
                        }
                        signal = rx.recv() => match signal {
                            Some(Ok(())) => {}
                            Some(Err(err)) => {
                                failure = Some(err);
                                break;
                            }
                            None => {
                                failure = Some(Arc::new(OperatorError::Internal(format!(
                                    "parent channel of {} closed early",
                                    key
                                ))));
                                break;
                            }
                        }
                    }
                }
                drop(rx);

                let result = match failure {
                    Some(err) => {
                        debug!(node = %key, error = %err, "Skipping resource, parent failed");
                        Err(err)
                    }
                    None => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => Err(Arc::new(OperatorError::Cancelled)),
                            result = processor() => result,
                        }
                    }
                };

                for child in children {
                    // capacity covers every parent, so this never waits
                    let _ = child.send(result.clone()).await;
                }

                (key, result)
            });
        }
        drop(senders);

        let mut report = RunReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (key, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    let err = Arc::new(OperatorError::Internal(format!(
                        "resource task failed: {}",
                        e
                    )));
                    if report.first_error.is_none() {
                        report.first_error = Some(err);
                    }
                    continue;
                }
            };
            if let Err(err) = &result {
                if report.first_error.is_none() {
                    report.first_error = Some(err.clone());
                }
            }
            report.outcomes.insert(key, result);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(name: &str) -> NodeKey {
        NodeKey::new("v1", "ConfigMap", "default", name)
    }

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Processor {
        let log = log.clone();
        let name = name.to_string();
        Arc::new(move || {
            let log = log.clone();
            let name = name.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                log.lock().push(name);
                Ok(())
            }
            .boxed()
        })
    }

    fn failing(message: &str) -> Processor {
        let message = message.to_string();
        Arc::new(move || {
            let message = message.clone();
            async move { Err(Arc::new(OperatorError::not_ready(message))) }.boxed()
        })
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ResourceGraph::new();
        graph.add_resource(key("a"), &[], recording(&log, "a")).unwrap();
        let err = graph
            .add_resource(key("a"), &[], recording(&log, "a"))
            .unwrap_err();
        assert!(matches!(err, OperatorError::DuplicateResource(_)));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ResourceGraph::new();
        let err = graph
            .add_resource(key("b"), &[key("a")], recording(&log, "b"))
            .unwrap_err();
        assert!(matches!(err, OperatorError::UnknownParent { .. }));
        assert!(graph.is_empty());
    }

    #[tokio::test]
    async fn test_children_run_after_all_parents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ResourceGraph::new();
        graph.add_resource(key("a"), &[], recording(&log, "a")).unwrap();
        graph.add_resource(key("b"), &[], recording(&log, "b")).unwrap();
        graph
            .add_resource(key("c"), &[key("a"), key("b")], recording(&log, "c"))
            .unwrap();
        graph
            .add_resource(key("d"), &[key("c")], recording(&log, "d"))
            .unwrap();

        graph.run(&CancellationToken::new()).await.unwrap();

        let log = log.lock();
        let pos = |n: &str| log.iter().position(|x| x == n).unwrap();
        assert_eq!(log.len(), 4);
        assert!(pos("c") > pos("a"));
        assert!(pos("c") > pos("b"));
        assert!(pos("d") > pos("c"));
    }

    #[tokio::test]
    async fn test_parent_failure_skips_descendants() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ResourceGraph::new();
        graph.add_resource(key("a"), &[], failing("a not ready")).unwrap();
        graph.add_resource(key("b"), &[], recording(&log, "b")).unwrap();
        graph
            .add_resource(key("c"), &[key("a")], recording(&log, "c"))
            .unwrap();
        graph
            .add_resource(key("d"), &[key("c"), key("b")], recording(&log, "d"))
            .unwrap();

        let report = graph.run_with_report(&CancellationToken::new()).await;

        assert_eq!(*log.lock(), vec!["b".to_string()]);
        let root = report.outcomes[&key("a")].clone().unwrap_err();
        let propagated = report.outcomes[&key("d")].clone().unwrap_err();
        assert!(Arc::ptr_eq(&root, &propagated));
        assert!(report.succeeded(&key("b")));
        assert!(report.into_result().unwrap_err().to_string().contains("a not ready"));
    }

    #[tokio::test]
    async fn test_run_is_repeatable() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let processor: Processor = Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });

        let mut graph = ResourceGraph::new();
        graph.add_resource(key("a"), &[], processor.clone()).unwrap();
        graph.add_resource(key("b"), &[key("a")], processor).unwrap();

        let cancel = CancellationToken::new();
        graph.run(&cancel).await.unwrap();
        graph.run(&cancel).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = ResourceGraph::new();
        graph.add_resource(key("a"), &[], recording(&log, "a")).unwrap();
        graph
            .add_resource(key("b"), &[key("a")], recording(&log, "b"))
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = graph.run(&cancel).await.unwrap_err();
        assert!(matches!(err.root(), OperatorError::Cancelled));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_node_key_group() {
        assert_eq!(NodeKey::new("v1", "Secret", "ns", "s").group(), "");
        assert_eq!(
            NodeKey::new("goharbor.io/v1beta1", "Core", "ns", "c").group(),
            "goharbor.io"
        );
    }
}
