use crate::executor::{BuildExecutor, NodeStatus};
use crate::graph::{Graph, GraphBuilder};
use crate::layout::{write_json, StateLayout};
use crate::registry::DefinitionRegistry;
use graphcore::{AttrRef, BuildEvent, BuildReport, EventBus, GraphError, Node, NodeId, NodeSpec, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a project
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// Directory holding `.graph/` state and node working directories
    pub root: PathBuf,
    /// Derive ids of unnamed nodes from definition name and ordinal
    pub automatic_node_names: bool,
    /// Discard all persisted state when the project opens
    pub remove_existing_graph: bool,
    /// `scoped` builds right after closing
    pub build_on_close: bool,
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            automatic_node_names: false,
            remove_existing_graph: false,
            build_on_close: false,
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
        }
    }
}

impl ProjectConfig {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_automatic_node_names(mut self, enabled: bool) -> Self {
        self.automatic_node_names = enabled;
        self
    }

    pub fn with_remove_existing_graph(mut self, enabled: bool) -> Self {
        self.remove_existing_graph = enabled;
        self
    }

    pub fn with_build_on_close(mut self, enabled: bool) -> Self {
        self.build_on_close = enabled;
        self
    }

    pub fn with_max_parallel_nodes(mut self, max: usize) -> Self {
        self.max_parallel_nodes = max;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }
}

/// Handle to a registered node, used to wire its outputs into later nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    id: NodeId,
}

impl NodeHandle {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn output(&self, attribute: &str) -> AttrRef {
        AttrRef::new(self.id.clone(), attribute)
    }
}

/// Scope under which nodes are declared and from which builds run.
///
/// A project is open until `close` (or the first `build`/`status`), after
/// which the graph is frozen.
pub struct Project {
    config: ProjectConfig,
    layout: StateLayout,
    definitions: DefinitionRegistry,
    builder: Option<GraphBuilder>,
    graph: Option<Graph>,
    executor: BuildExecutor,
    event_bus: Arc<EventBus>,
}

impl Project {
    pub fn open(config: ProjectConfig) -> Result<Self, GraphError> {
        let layout = StateLayout::new(config.root.clone());
        std::fs::create_dir_all(layout.root())?;
        if config.remove_existing_graph {
            tracing::info!("Removing existing graph state under {}", layout.state_dir().display());
            layout.remove_state()?;
        }

        tracing::debug!("Opened project at {}", layout.root().display());
        Ok(Self {
            builder: Some(GraphBuilder::new(layout.clone(), config.automatic_node_names)),
            graph: None,
            definitions: DefinitionRegistry::new(),
            executor: BuildExecutor::new(layout.clone(), config.max_parallel_nodes),
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            layout,
            config,
        })
    }

    /// Open a project, declare nodes, close it and, with `build_on_close`,
    /// build it. The project is closed even when `declare` fails.
    pub async fn scoped<F>(config: ProjectConfig, declare: F) -> Result<(Project, Option<BuildReport>), GraphError>
    where
        F: FnOnce(&mut Project) -> Result<(), GraphError>,
    {
        let mut project = Project::open(config)?;
        if let Err(e) = declare(&mut project) {
            if let Err(close_error) = project.close() {
                tracing::debug!("Closing after failed declaration: {}", close_error);
            }
            return Err(e);
        }
        project.close()?;

        let report = if project.config.build_on_close {
            Some(project.build().await?)
        } else {
            None
        };
        Ok((project, report))
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn is_closed(&self) -> bool {
        self.builder.is_none()
    }

    pub fn add(&mut self, node: impl Node + 'static, spec: NodeSpec) -> Result<NodeHandle, GraphError> {
        self.add_shared(Arc::new(node), spec)
    }

    /// Register a node instance.
    pub fn add_shared(&mut self, node: Arc<dyn Node>, spec: NodeSpec) -> Result<NodeHandle, GraphError> {
        let builder = self.builder.as_mut().ok_or(GraphError::ProjectClosed)?;
        let definition = self.definitions.resolve(node.as_ref())?;
        let id = builder.register(node, definition, spec)?;
        Ok(NodeHandle { id })
    }

    /// Validate references, roles and acyclicity and freeze the graph.
    pub fn close(&mut self) -> Result<(), GraphError> {
        let builder = self.builder.take().ok_or(GraphError::ProjectClosed)?;
        let attempted = builder.record("invalid");

        match builder.finish() {
            Ok(graph) => {
                write_json(&self.layout.graph_file(), &graph.record())?;
                tracing::info!("Closed project with {} nodes", graph.len());
                self.graph = Some(graph);
                Ok(())
            }
            Err(e) => {
                if let Err(write_error) = write_json(&self.layout.graph_file(), &attempted) {
                    tracing::warn!("Could not record rejected graph: {}", write_error);
                }
                Err(e)
            }
        }
    }

    fn closed_graph(&mut self) -> Result<&Graph, GraphError> {
        if self.builder.is_some() {
            self.close()?;
        }
        self.graph.as_ref().ok_or(GraphError::ProjectClosed)
    }

    /// Close if needed and run the scheduler.
    ///
    /// Returns `GraphError::BuildFailed` carrying the report when any node
    /// failed or was blocked.
    pub async fn build(&mut self) -> Result<BuildReport, GraphError> {
        self.closed_graph()?;
        let graph = self.graph.as_ref().ok_or(GraphError::ProjectClosed)?;
        let report = self.executor.execute(graph, &self.event_bus).await;
        if report.is_success() {
            Ok(report)
        } else {
            Err(GraphError::BuildFailed(Box::new(report)))
        }
    }

    /// Dry run: which nodes a build would run, and why.
    pub fn status(&mut self) -> Result<Vec<NodeStatus>, GraphError> {
        self.closed_graph()?;
        let graph = self.graph.as_ref().ok_or(GraphError::ProjectClosed)?;
        Ok(self.executor.status(graph))
    }

    /// Persisted value of an output, `None` if it was never produced.
    /// `OutsPath` outputs load as their path.
    pub fn load_output(&mut self, node: &str, attribute: &str) -> Result<Option<Value>, GraphError> {
        self.closed_graph()?;
        let graph = self.graph.as_ref().ok_or(GraphError::ProjectClosed)?;
        Ok(graph
            .get(node)
            .and_then(|instance| self.executor.load_output(instance, attribute)))
    }

    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<BuildEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        if let Some(builder) = &self.builder {
            if let Err(e) = write_json(&self.layout.graph_file(), &builder.record("incomplete")) {
                tracing::warn!("Could not flush graph metadata: {}", e);
            }
        }
    }
}
