//! Graph builder.
//!
//! Nodes are registered one at a time while a project is open. Each
//! registration validates the instantiation arguments against the node's
//! definition and records one edge per upstream reference. References may
//! point at nodes declared later, so edge endpoints, output roles and
//! acyclicity are only checked in `finish`, before anything runs.

use crate::layout::StateLayout;
use chrono::{DateTime, Utc};
use graphcore::{
    AttrRef, Binding, DefinitionError, GraphError, Node, NodeDefinition, NodeId, NodeSpec, Role, Value,
};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// A registered node with its resolved attribute values.
pub struct NodeInstance {
    pub id: NodeId,
    pub definition: Arc<NodeDefinition>,
    /// Every parameter, defaults merged with instantiation values
    pub params: BTreeMap<String, Value>,
    /// Upstream references of Dependency and DepsPath attributes
    pub bindings: BTreeMap<String, Binding>,
    /// Resolved location of every path attribute
    pub paths: BTreeMap<String, PathBuf>,
    node: Arc<dyn Node>,
}

impl NodeInstance {
    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    pub fn upstream_refs(&self) -> impl Iterator<Item = &AttrRef> {
        self.bindings.values().flat_map(|b| b.refs().iter())
    }

    fn record(&self) -> NodeRecord {
        NodeRecord {
            id: self.id.clone(),
            definition: self.definition.name().to_string(),
            version: self.definition.version().map(str::to_string),
            identity: self.definition.identity().to_string(),
            params: self.params.clone(),
            bindings: self.bindings.clone(),
            paths: self
                .paths
                .iter()
                .map(|(k, v)| (k.clone(), v.display().to_string()))
                .collect(),
        }
    }
}

/// Serialized form of the graph, written to `graph.json`.
#[derive(Debug, Serialize)]
pub struct GraphRecord {
    pub status: &'static str,
    pub written_at: DateTime<Utc>,
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Serialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub definition: String,
    pub version: Option<String>,
    pub identity: String,
    pub params: BTreeMap<String, Value>,
    pub bindings: BTreeMap<String, Binding>,
    pub paths: BTreeMap<String, String>,
}

pub struct GraphBuilder {
    layout: StateLayout,
    automatic_node_names: bool,
    instances: Vec<NodeInstance>,
    index: HashMap<NodeId, usize>,
    ordinals: HashMap<String, usize>,
    unnamed: HashSet<String>,
    edges: Vec<(NodeId, usize)>,
}

impl GraphBuilder {
    pub fn new(layout: StateLayout, automatic_node_names: bool) -> Self {
        Self {
            layout,
            automatic_node_names,
            instances: Vec::new(),
            index: HashMap::new(),
            ordinals: HashMap::new(),
            unnamed: HashSet::new(),
            edges: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn record(&self, status: &'static str) -> GraphRecord {
        GraphRecord {
            status,
            written_at: Utc::now(),
            nodes: self.instances.iter().map(NodeInstance::record).collect(),
        }
    }

    /// Registers a node instance and returns its id.
    pub fn register(
        &mut self,
        node: Arc<dyn Node>,
        definition: Arc<NodeDefinition>,
        spec: NodeSpec,
    ) -> Result<NodeId, GraphError> {
        let id = self.assign_id(&definition, spec.name.as_deref())?;
        let name = id.as_str();

        for (key, value) in &spec.params {
            expect_role(&definition, name, key, "a value", |r| matches!(r, Role::Parameter))?;
            if let Some(reason) = value.find_unhashable() {
                return Err(DefinitionError::UnhashableParameter {
                    node: name.to_string(),
                    attribute: key.clone(),
                    reason,
                }
                .into());
            }
        }
        for (key, binding) in &spec.deps {
            expect_role(&definition, name, key, "a reference", Role::accepts_reference)?;
            if binding.refs().is_empty() {
                return Err(DefinitionError::UnboundDependency {
                    node: name.to_string(),
                    attribute: key.clone(),
                }
                .into());
            }
        }
        for key in spec.paths.keys() {
            expect_role(&definition, name, key, "a path", Role::is_path)?;
            if spec.deps.contains_key(key) {
                return Err(DefinitionError::RoleMismatch {
                    node: name.to_string(),
                    attribute: key.clone(),
                    reason: "bound to both a path and a reference".to_string(),
                }
                .into());
            }
        }

        let mut params = BTreeMap::new();
        let mut paths = BTreeMap::new();
        for attr in definition.attributes() {
            match &attr.role {
                Role::Parameter => {
                    let value = spec
                        .params
                        .get(&attr.name)
                        .or(attr.default.as_ref())
                        .cloned()
                        .ok_or_else(|| DefinitionError::MissingParameter {
                            node: name.to_string(),
                            attribute: attr.name.clone(),
                        })?;
                    params.insert(attr.name.clone(), value);
                }
                Role::Dependency if !spec.deps.contains_key(&attr.name) => {
                    return Err(DefinitionError::UnboundDependency {
                        node: name.to_string(),
                        attribute: attr.name.clone(),
                    }
                    .into());
                }
                // Bound DepsPath locations come from the upstream node in `finish`.
                Role::DepsPath if spec.deps.contains_key(&attr.name) => {}
                role if role.is_path() => {
                    let template = spec
                        .paths
                        .get(&attr.name)
                        .or(attr.path_template.as_ref())
                        .ok_or_else(|| DefinitionError::MissingPath {
                            node: name.to_string(),
                            attribute: attr.name.clone(),
                        })?;
                    paths.insert(attr.name.clone(), self.layout.resolve_template(template, &id));
                }
                _ => {}
            }
        }

        let position = self.instances.len();
        for binding in spec.deps.values() {
            for r in binding.refs() {
                self.edges.push((r.node.clone(), position));
            }
        }

        *self.ordinals.entry(definition.name().to_string()).or_insert(0) += 1;
        if spec.name.is_none() && !self.automatic_node_names {
            self.unnamed.insert(definition.name().to_string());
        }

        tracing::debug!("Registered node {} ({})", id, definition.name());
        self.index.insert(id.clone(), position);
        self.instances.push(NodeInstance {
            id: id.clone(),
            definition,
            params,
            bindings: spec.deps,
            paths,
            node,
        });
        Ok(id)
    }

    /// Derives the id of the next instance without reserving it; `register`
    /// commits the ordinal only once the instance is accepted.
    fn assign_id(&self, definition: &NodeDefinition, name: Option<&str>) -> Result<NodeId, DefinitionError> {
        let def_name = definition.name();
        let current = self.ordinals.get(def_name).copied().unwrap_or(0);

        let id = match name {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            Some(_) => return Err(DefinitionError::EmptyName),
            None if self.automatic_node_names => {
                if current == 0 {
                    def_name.to_string()
                } else {
                    format!("{}_{}", def_name, current)
                }
            }
            None => {
                if self.unnamed.contains(def_name) {
                    return Err(DefinitionError::NameCollision {
                        definition: def_name.to_string(),
                    });
                }
                def_name.to_string()
            }
        };

        check_path_safe(&id)?;
        if self.index.contains_key(id.as_str()) {
            return Err(DefinitionError::DuplicateNodeId(id));
        }
        Ok(NodeId::from(id))
    }

    /// Validates references and acyclicity and produces the executable graph.
    pub fn finish(mut self) -> Result<Graph, GraphError> {
        let mut graph: DiGraph<NodeId, ()> = DiGraph::with_capacity(self.instances.len(), self.edges.len());
        for instance in &self.instances {
            graph.add_node(instance.id.clone());
        }

        for (from, to) in &self.edges {
            let source = *self.index.get(from).ok_or_else(|| GraphError::UnknownNode {
                missing: from.clone(),
                referenced_by: self.instances[*to].id.clone(),
            })?;
            graph.update_edge(NodeIndex::new(source), NodeIndex::new(*to), ());
        }

        if let Some(cycle_path) = find_cycle(&graph) {
            tracing::error!("Cycle detected: {:?}", cycle_path);
            return Err(GraphError::CyclicGraph { cycle_path });
        }

        self.resolve_bound_paths()?;
        let order = stable_topological_order(&graph);

        Ok(Graph {
            instances: self.instances,
            index: self.index,
            graph,
            order,
        })
    }

    /// Checks each reference targets an output of the right kind and copies
    /// upstream `OutsPath` locations into bound `DepsPath` attributes.
    fn resolve_bound_paths(&mut self) -> Result<(), GraphError> {
        let mut resolved: Vec<(usize, String, PathBuf)> = Vec::new();

        for (position, instance) in self.instances.iter().enumerate() {
            for (attr_name, binding) in &instance.bindings {
                let role = instance
                    .definition
                    .attribute(attr_name)
                    .map(|a| a.role.clone())
                    .unwrap_or(Role::Dependency);

                if role == Role::DepsPath && binding.refs().len() != 1 {
                    return Err(mismatch(instance, attr_name, "a deps_path binds exactly one outs_path"));
                }

                for r in binding.refs() {
                    let target = &self.instances[self.index[&r.node]];
                    let target_attr = target.definition.attribute(&r.attribute).ok_or_else(|| {
                        DefinitionError::UnknownAttribute {
                            node: r.node.to_string(),
                            attribute: r.attribute.clone(),
                        }
                    })?;

                    match (&role, &target_attr.role) {
                        (Role::DepsPath, Role::OutsPath) => {
                            resolved.push((position, attr_name.clone(), target.paths[&r.attribute].clone()));
                        }
                        (Role::DepsPath, _) => {
                            return Err(mismatch(instance, attr_name, &format!("'{}' is not an outs_path", r)));
                        }
                        (_, target_role) if !target_role.is_output() => {
                            return Err(mismatch(instance, attr_name, &format!("'{}' is not an output", r)));
                        }
                        _ => {}
                    }
                }
            }
        }

        for (position, attr_name, path) in resolved {
            self.instances[position].paths.insert(attr_name, path);
        }
        Ok(())
    }
}

fn expect_role(
    definition: &NodeDefinition,
    node: &str,
    key: &str,
    what: &str,
    accepts: impl Fn(&Role) -> bool,
) -> Result<(), DefinitionError> {
    let attr = definition.attribute(key).ok_or_else(|| DefinitionError::UnknownAttribute {
        node: node.to_string(),
        attribute: key.to_string(),
    })?;
    if accepts(&attr.role) {
        Ok(())
    } else {
        Err(DefinitionError::RoleMismatch {
            node: node.to_string(),
            attribute: key.to_string(),
            reason: format!("a {} attribute cannot take {}", attr.role.label(), what),
        })
    }
}

fn mismatch(instance: &NodeInstance, attribute: &str, reason: &str) -> GraphError {
    DefinitionError::RoleMismatch {
        node: instance.id.to_string(),
        attribute: attribute.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Node ids become single path components under `.graph/nodes` and `nodes`.
fn check_path_safe(id: &str) -> Result<(), DefinitionError> {
    let invalid = |reason: &str| {
        Err(DefinitionError::InvalidNodeId {
            id: id.to_string(),
            reason: reason.to_string(),
        })
    };
    if id.is_empty() {
        return invalid("empty");
    }
    if id == "." || id == ".." {
        return invalid("relative path component");
    }
    if id.contains(['/', '\\']) {
        return invalid("contains a path separator");
    }
    if id.contains('\0') {
        return invalid("contains a NUL byte");
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Depth-first search with white/gray/black colouring. Returns the first
/// cycle found as a closed path (first node repeated at the end).
fn find_cycle(graph: &DiGraph<NodeId, ()>) -> Option<Vec<NodeId>> {
    fn visit(
        graph: &DiGraph<NodeId, ()>,
        node: NodeIndex,
        colors: &mut [Color],
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeId>> {
        colors[node.index()] = Color::Gray;
        stack.push(node);

        let mut next: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Outgoing).collect();
        next.sort();
        for succ in next {
            match colors[succ.index()] {
                Color::Gray => {
                    let start = stack.iter().position(|n| *n == succ).unwrap_or(0);
                    let mut cycle: Vec<NodeId> = stack[start..].iter().map(|n| graph[*n].clone()).collect();
                    cycle.push(graph[succ].clone());
                    return Some(cycle);
                }
                Color::White => {
                    if let Some(cycle) = visit(graph, succ, colors, stack) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        stack.pop();
        colors[node.index()] = Color::Black;
        None
    }

    let mut colors = vec![Color::White; graph.node_count()];
    let mut stack = Vec::new();
    for node in graph.node_indices() {
        if colors[node.index()] == Color::White {
            if let Some(cycle) = visit(graph, node, &mut colors, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Kahn's algorithm; among ready nodes the earliest registered goes first.
fn stable_topological_order(graph: &DiGraph<NodeId, ()>) -> Vec<usize> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);
        for succ in graph.neighbors_directed(NodeIndex::new(current), Direction::Outgoing) {
            let degree = &mut in_degree[succ.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(succ.index()));
            }
        }
    }
    order
}

/// Closed, validated, acyclic graph. Read-only during execution.
pub struct Graph {
    instances: Vec<NodeInstance>,
    index: HashMap<NodeId, usize>,
    graph: DiGraph<NodeId, ()>,
    order: Vec<usize>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instance(&self, position: usize) -> &NodeInstance {
        &self.instances[position]
    }

    pub fn instances(&self) -> &[NodeInstance] {
        &self.instances
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&NodeInstance> {
        self.position(id).map(|p| &self.instances[p])
    }

    /// Positions in execution order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn predecessors(&self, position: usize) -> Vec<usize> {
        let mut preds: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(position), Direction::Incoming)
            .map(|n| n.index())
            .collect();
        preds.sort_unstable();
        preds
    }

    /// Every node reachable from `position`, excluding itself.
    pub fn descendants(&self, position: usize) -> Vec<usize> {
        let mut dfs = petgraph::visit::Dfs::new(&self.graph, NodeIndex::new(position));
        let mut found = Vec::new();
        while let Some(n) = dfs.next(&self.graph) {
            if n.index() != position {
                found.push(n.index());
            }
        }
        found.sort_unstable();
        found
    }

    pub fn record(&self) -> GraphRecord {
        GraphRecord {
            status: "closed",
            written_at: Utc::now(),
            nodes: self.instances.iter().map(NodeInstance::record).collect(),
        }
    }
}
