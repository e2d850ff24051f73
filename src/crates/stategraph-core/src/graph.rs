//! Graph definition: nodes, edges, and validation
//!
//! A [`Graph`] is the immutable description of a state machine: named nodes,
//! one outgoing [`Edge`] per node (direct or conditional), and an entry
//! point. Compile it once with [`Graph::compile`] and reuse the compiled
//! graph for every invocation.

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::node::NodeFn;
use crate::state::StateSchema;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use stategraph_checkpoint::CheckpointStore;

/// Node identifier - unique name for each node in the graph
pub type NodeId = String;

/// Virtual node marking where execution begins
pub const START: &str = "__start__";

/// Virtual node marking successful completion
pub const END: &str = "__end__";

/// Router function for conditional edges
///
/// Inspects the current state and returns the label of the next node. The
/// runtime rejects labels outside the edge's declared destination set.
pub type RouterFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Outgoing transition from a node
#[derive(Clone)]
pub enum Edge {
    /// Unconditional transition to a single node (or [`END`])
    Direct(NodeId),

    /// Dynamic routing via a router function
    ///
    /// `destinations` declares every node the router may legally return;
    /// it is used for validation and to reject stray labels at runtime.
    Conditional {
        /// Router deciding the next node from current state
        router: RouterFn,
        /// All labels the router is allowed to return
        destinations: Vec<NodeId>,
    },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(to) => f.debug_tuple("Direct").field(to).finish(),
            Edge::Conditional { destinations, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("destinations", destinations)
                .finish(),
        }
    }
}

/// Node definition: a name plus its executor
#[derive(Clone)]
pub struct NodeSpec {
    /// Node name, unique within the graph
    pub name: NodeId,
    /// Async executor invoked with the current state
    pub executor: NodeFn,
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("executor", &"<function>")
            .finish()
    }
}

/// Immutable graph definition
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, NodeSpec>,
    edges: HashMap<NodeId, Edge>,
    entry: Option<NodeId>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with the given name and executor
    pub fn add_node(&mut self, name: impl Into<String>, executor: NodeFn) {
        let name = name.into();
        self.nodes.insert(
            name.clone(),
            NodeSpec {
                name,
                executor,
            },
        );
    }

    /// Add a direct edge `from -> to` (use [`END`] to terminate)
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
    }

    /// Add a conditional edge with a router and its declared destinations
    pub fn add_conditional_edge(
        &mut self,
        from: impl Into<String>,
        router: RouterFn,
        destinations: Vec<&str>,
    ) {
        self.edges.insert(
            from.into(),
            Edge::Conditional {
                router,
                destinations: destinations.into_iter().map(String::from).collect(),
            },
        );
    }

    /// Set the entry node
    pub fn set_entry(&mut self, node: impl Into<String>) {
        self.entry = Some(node.into());
    }

    /// Entry node name, if set
    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    /// Node spec by name
    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.get(name)
    }

    /// Outgoing edge of a node, if any
    pub fn edge(&self, from: &str) -> Option<&Edge> {
        self.edges.get(from)
    }

    /// Validate structure: entry set and present, edge endpoints defined
    pub fn validate(&self) -> Result<()> {
        let entry = self
            .entry
            .as_deref()
            .ok_or_else(|| GraphError::InvalidGraph("no entry node set".to_string()))?;

        if !self.nodes.contains_key(entry) {
            return Err(GraphError::InvalidGraph(format!(
                "entry node {} does not exist",
                entry
            )));
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) && from != START {
                return Err(GraphError::InvalidGraph(format!(
                    "edge source {} does not exist",
                    from
                )));
            }

            match edge {
                Edge::Direct(to) => {
                    if !self.nodes.contains_key(to) && to != END {
                        return Err(GraphError::InvalidGraph(format!(
                            "edge target {} does not exist",
                            to
                        )));
                    }
                }
                Edge::Conditional { destinations, .. } => {
                    if destinations.is_empty() {
                        return Err(GraphError::InvalidGraph(format!(
                            "conditional edge from {} declares no destinations",
                            from
                        )));
                    }
                    for to in destinations {
                        if !self.nodes.contains_key(to) && to != END {
                            return Err(GraphError::InvalidGraph(format!(
                                "branch target {} does not exist",
                                to
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Validate and compile against a checkpoint store
    ///
    /// `max_node_visits` bounds how many times a single node may execute in
    /// one invocation, preventing runaway conditional loops.
    pub fn compile(
        self,
        schema: StateSchema,
        checkpointer: Arc<dyn CheckpointStore>,
        max_node_visits: u32,
    ) -> Result<CompiledGraph> {
        self.validate()?;
        Ok(CompiledGraph::new(self, schema, checkpointer, max_node_visits))
    }
}
