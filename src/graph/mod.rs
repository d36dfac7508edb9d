//! The live task graph and the materializer that fills it.
//!
//! Every task object lives in an arena backed by a `petgraph` graph, edges
//! pointing from a task to its children. Within one materialization pass a
//! canonical key yields at most one node, however many parents list it.

mod dot;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::{Graph, algo};
use serde_json::Value;

use crate::config::RunConfig;
use crate::error::{ConfigError, InternalError, PluginError, QuireError};
use crate::key::TaskKey;
use crate::registry::Registry;
use crate::task::{Task, TaskSpec};
use crate::tree::{DependencyTree, Options};

pub use dot::Dot;

pub struct TaskNode {
    pub key: TaskKey,
    pub task: Box<dyn Task>,
    /// Surviving children in recorded order.
    pub children: Vec<NodeIndex>,
}

#[derive(Default)]
pub struct TaskGraph {
    graph: Graph<TaskNode, ()>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node along with edges to its children, which must already be
    /// in the graph.
    pub fn insert(&mut self, node: TaskNode) -> NodeIndex {
        let children = node.children.clone();
        let index = self.graph.add_node(node);

        for child in children {
            self.graph.add_edge(index, child, ());
        }

        index
    }

    pub fn node(&self, index: NodeIndex) -> &TaskNode {
        &self.graph[index]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut TaskNode {
        &mut self.graph[index]
    }

    /// The task itself followed by its descendants, depth-first.
    pub fn walk(&self, root: NodeIndex) -> Vec<NodeIndex> {
        let mut order = Vec::new();
        let mut stack = vec![root];

        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.graph[index].children.iter().rev());
        }

        order
    }

    /// Depth-first order over all `roots`, each task appearing once at its
    /// first visit.
    pub fn sweep_order(&self, roots: &[NodeIndex]) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();

        roots
            .iter()
            .flat_map(|&root| self.walk(root))
            .filter(|index| seen.insert(*index))
            .collect()
    }

    pub fn find(&self, key: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&index| self.graph[index].key.as_str() == key)
    }

    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn dot(&self) -> Dot<'_> {
        Dot(self)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn is_inactive(options: &Options) -> bool {
    options.get("inactive").is_some_and(is_truthy)
}

/// Turns dependency trees into task objects using the registered factories.
pub struct Materializer {
    registry: Arc<Registry>,
    config: Arc<RunConfig>,
}

impl Materializer {
    pub fn new(registry: Arc<Registry>, config: Arc<RunConfig>) -> Self {
        Self { registry, config }
    }

    /// Builds every active task reachable from the tree's roots, children
    /// before parents, and returns the root nodes in order. Inactive roots
    /// produce nothing.
    pub fn materialize(
        &self,
        tree: &DependencyTree,
        graph: &mut TaskGraph,
    ) -> Result<Vec<NodeIndex>, QuireError> {
        check_cycles(tree)?;

        let mut built: HashMap<TaskKey, Option<NodeIndex>> = HashMap::new();
        let mut roots = Vec::new();

        for key in tree.roots() {
            if let Some(index) = self.build(tree, key, graph, &mut built)? {
                roots.push(index);
            }
        }

        Ok(roots)
    }

    fn build(
        &self,
        tree: &DependencyTree,
        root: &TaskKey,
        graph: &mut TaskGraph,
        built: &mut HashMap<TaskKey, Option<NodeIndex>>,
    ) -> Result<Option<NodeIndex>, QuireError> {
        let mut stack = vec![(root.clone(), false)];

        while let Some((key, expanded)) = stack.pop() {
            if built.contains_key(&key) {
                continue;
            }

            let options = tree.metadata_of(&key)?;
            if is_inactive(&options) {
                tracing::debug!("skipping inactive task '{key}'");
                built.insert(key, None);
                continue;
            }

            let children = tree.children_of(&key)?;

            if !expanded {
                stack.push((key.clone(), true));
                for child in children.iter().rev() {
                    if !built.contains_key(child) {
                        stack.push((child.clone(), false));
                    }
                }
                continue;
            }

            let children = children
                .iter()
                .filter_map(|child| built.get(child).copied().flatten())
                .collect();

            let index = self.construct(&key, options, children, graph)?;
            built.insert(key, Some(index));
        }

        Ok(built.get(root).copied().flatten())
    }

    /// Creates a single task through its category's factory.
    pub(crate) fn construct(
        &self,
        key: &TaskKey,
        options: Options,
        children: Vec<NodeIndex>,
        graph: &mut TaskGraph,
    ) -> Result<NodeIndex, QuireError> {
        let category = key.category();
        let factory = self
            .registry
            .factory(category)
            .ok_or_else(|| InternalError::UnhandledCategory(category.to_string()))?;

        let child_keys: Vec<TaskKey> = children
            .iter()
            .map(|&index| graph.node(index).key.clone())
            .collect();

        let shown = Value::Object(options.clone()).to_string();
        tracing::debug!(
            "creating task '{key}' with children {:?} and options {shown}",
            child_keys.iter().map(TaskKey::as_str).collect::<Vec<_>>(),
        );

        let spec = TaskSpec {
            key: key.clone(),
            category: category.to_string(),
            pattern: key.pattern().to_string(),
            children: child_keys,
            options,
            config: self.config.clone(),
        };

        let task = factory
            .create(spec)
            .map_err(|source| PluginError::Create {
                key: key.clone(),
                category: category.to_string(),
                source,
            })?;

        Ok(graph.insert(TaskNode {
            key: key.clone(),
            task,
            children,
        }))
    }
}

/// Rejects cycles among the active tasks reachable from the roots.
fn check_cycles(tree: &DependencyTree) -> Result<(), QuireError> {
    let mut graph: DiGraph<TaskKey, ()> = DiGraph::new();
    let mut nodes: HashMap<TaskKey, NodeIndex> = HashMap::new();
    let mut stack: Vec<TaskKey> = tree.roots().to_vec();

    while let Some(key) = stack.pop() {
        if nodes.contains_key(&key) || is_inactive(&tree.metadata_of(&key)?) {
            continue;
        }
        let index = graph.add_node(key.clone());
        nodes.insert(key.clone(), index);
        stack.extend(tree.children_of(&key)?.iter().cloned());
    }

    for (key, &parent) in &nodes {
        for child in tree.children_of(key)? {
            if let Some(&child) = nodes.get(child) {
                graph.add_edge(parent, child, ());
            }
        }
    }

    algo::toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| ConfigError::DependencyCycle(graph[cycle.node_id()].clone()).into())
}
