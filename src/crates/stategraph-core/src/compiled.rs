//! Compiled graph execution
//!
//! [`CompiledGraph`] binds a validated [`Graph`] to a [`StateSchema`] and a
//! [`CheckpointStore`]. It is compiled once per process and reused for all
//! invocations; each invocation is addressed by a `thread_id` that names the
//! conversation whose history it shares.
//!
//! After every node the runtime applies the schema's reducers and appends a
//! checkpoint, so a crashed process can re-enter any suspended thread from
//! durable storage and reproduce identical behaviour.

use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, END};
use crate::node::NodeOutput;
use crate::state::{apply_delta, StateSchema};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use stategraph_checkpoint::{Checkpoint, CheckpointStore};
use tracing::{debug, warn};

/// State key under which a resume value is delivered to the suspended node
///
/// When a thread is resumed, the runtime injects the decision under this key
/// before re-entering the node that interrupted. The key is removed again
/// after that node completes, so it never leaks into later nodes.
pub const RESUME_KEY: &str = "__resume__";

/// Input for one graph invocation
#[derive(Debug, Clone)]
pub enum GraphInput {
    /// Begin at the entry node with the given initial state
    Start(Value),

    /// Re-enter a suspended thread, delivering a decision to the gate node
    Resume(Value),
}

impl GraphInput {
    /// Start a fresh pass with the given initial state
    pub fn start(state: Value) -> Self {
        GraphInput::Start(state)
    }

    /// Resume a suspended thread with a decision value
    pub fn resume(decision: Value) -> Self {
        GraphInput::Resume(decision)
    }
}

/// Result of one graph invocation
#[derive(Debug, Clone)]
pub enum GraphOutcome {
    /// The graph ran to [`END`]
    Completed {
        /// Final accumulated state
        state: Value,
        /// Ordered names of executed nodes
        trace: Vec<String>,
    },

    /// A node interrupted; the thread is suspended awaiting a resume
    Interrupted {
        /// State at the moment of suspension
        state: Value,
        /// Structured payload carried by the interrupt
        interrupt: Value,
        /// Ordered names of executed nodes
        trace: Vec<String>,
    },
}

impl GraphOutcome {
    /// Whether this outcome is an interrupt
    pub fn is_interrupted(&self) -> bool {
        matches!(self, GraphOutcome::Interrupted { .. })
    }

    /// The final state regardless of outcome kind
    pub fn state(&self) -> &Value {
        match self {
            GraphOutcome::Completed { state, .. } => state,
            GraphOutcome::Interrupted { state, .. } => state,
        }
    }

    /// The executed node trace regardless of outcome kind
    pub fn trace(&self) -> &[String] {
        match self {
            GraphOutcome::Completed { trace, .. } => trace,
            GraphOutcome::Interrupted { trace, .. } => trace,
        }
    }
}

/// Executable graph bound to a schema and checkpoint store
pub struct CompiledGraph {
    graph: Graph,
    schema: StateSchema,
    checkpointer: Arc<dyn CheckpointStore>,
    max_node_visits: u32,
}

impl CompiledGraph {
    pub(crate) fn new(
        graph: Graph,
        schema: StateSchema,
        checkpointer: Arc<dyn CheckpointStore>,
        max_node_visits: u32,
    ) -> Self {
        Self {
            graph,
            schema,
            checkpointer,
            max_node_visits,
        }
    }

    /// The checkpoint store this graph writes through
    pub fn checkpointer(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpointer
    }

    /// Execute the graph for one thread
    ///
    /// With [`GraphInput::Start`] the run begins at the entry node; with
    /// [`GraphInput::Resume`] the latest checkpoint is reloaded and the
    /// suspended node re-executes with the decision under [`RESUME_KEY`].
    ///
    /// # Errors
    ///
    /// Fails on unknown nodes, undeclared router destinations, exceeded
    /// visit bounds, missing checkpoints on resume, node failures, and
    /// checkpoint-store errors.
    pub async fn invoke(&self, input: GraphInput, thread_id: &str) -> Result<GraphOutcome> {
        let (mut state, mut current, mut index, resuming) = match input {
            GraphInput::Start(initial) => {
                let entry = self
                    .graph
                    .entry()
                    .ok_or_else(|| GraphError::InvalidGraph("no entry node set".to_string()))?
                    .to_string();
                // A fresh pass on a thread with history (e.g. after a timed
                // out run) keeps the log monotonic by continuing the index.
                let base = self
                    .checkpointer
                    .get_latest(thread_id)
                    .await?
                    .map(|cp| cp.index + 1)
                    .unwrap_or(0);
                let initial = match initial {
                    Value::Object(_) => initial,
                    _ => Value::Object(serde_json::Map::new()),
                };
                (initial, entry, base, false)
            }
            GraphInput::Resume(decision) => {
                let cp = self
                    .checkpointer
                    .get_latest(thread_id)
                    .await?
                    .ok_or_else(|| GraphError::NoCheckpoint(thread_id.to_string()))?;
                if cp.interrupt.is_none() {
                    return Err(GraphError::NotInterrupted(thread_id.to_string()));
                }
                let node = cp
                    .next_node
                    .clone()
                    .ok_or_else(|| GraphError::NotInterrupted(thread_id.to_string()))?;

                let mut state = cp.state.clone();
                if let Some(map) = state.as_object_mut() {
                    map.insert(RESUME_KEY.to_string(), decision);
                }
                (state, node, cp.index + 1, true)
            }
        };

        let mut visits: HashMap<String, u32> = HashMap::new();
        let mut trace: Vec<String> = Vec::new();
        let mut strip_resume_after_node = resuming;

        loop {
            let seen = visits.entry(current.clone()).or_insert(0);
            *seen += 1;
            if *seen > self.max_node_visits {
                return Err(GraphError::IterationLimit {
                    node: current,
                    limit: self.max_node_visits,
                });
            }

            let spec = self
                .graph
                .node(&current)
                .ok_or_else(|| GraphError::UnknownNode(current.clone()))?;

            debug!(thread_id, node = %current, "Executing node");
            trace.push(current.clone());

            match (spec.executor)(state.clone()).await? {
                NodeOutput::Interrupt(payload) => {
                    let checkpoint = Checkpoint::new(thread_id, index, state.clone())
                        .with_next_node(current.clone())
                        .with_interrupt(payload.clone());
                    self.checkpointer.put(checkpoint).await?;

                    debug!(thread_id, node = %current, "Thread suspended at interrupt");
                    return Ok(GraphOutcome::Interrupted {
                        state,
                        interrupt: payload,
                        trace,
                    });
                }
                NodeOutput::Update(delta) => {
                    state = apply_delta(&self.schema, &state, &delta);
                    if strip_resume_after_node {
                        if let Some(map) = state.as_object_mut() {
                            map.remove(RESUME_KEY);
                        }
                        strip_resume_after_node = false;
                    }

                    let next = self.next_node(&current, &state)?;

                    let mut checkpoint = Checkpoint::new(thread_id, index, state.clone());
                    if next != END {
                        checkpoint = checkpoint.with_next_node(next.clone());
                    }
                    self.checkpointer.put(checkpoint).await?;
                    index += 1;

                    if next == END {
                        return Ok(GraphOutcome::Completed { state, trace });
                    }
                    current = next;
                }
            }
        }
    }

    fn next_node(&self, current: &str, state: &Value) -> Result<String> {
        match self.graph.edge(current) {
            None => Ok(END.to_string()),
            Some(Edge::Direct(to)) => Ok(to.clone()),
            Some(Edge::Conditional {
                router,
                destinations,
            }) => {
                let label = router(state);
                if destinations.iter().any(|d| d == &label) {
                    Ok(label)
                } else {
                    warn!(node = current, label = %label, "Router returned undeclared destination");
                    Err(GraphError::InvalidRoute {
                        node: current.to_string(),
                        label,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::node::{node_fn, NodeOutput};
    use crate::state::{Reducer, StateSchema};
    use serde_json::json;
    use stategraph_checkpoint::MemoryCheckpointStore;

    fn schema() -> StateSchema {
        StateSchema::new().with_field("log", Reducer::AppendUnique)
    }

    fn counter_graph() -> Graph {
        let mut graph = Graph::new();
        graph.add_node(
            "inc",
            node_fn(|state| async move {
                let n = state["n"].as_i64().unwrap_or(0);
                Ok(NodeOutput::update(json!({"n": n + 1, "log": "inc"})))
            }),
        );
        graph.add_node(
            "double",
            node_fn(|state| async move {
                let n = state["n"].as_i64().unwrap_or(0);
                Ok(NodeOutput::update(json!({"n": n * 2, "log": "double"})))
            }),
        );
        graph.set_entry("inc");
        graph.add_edge("inc", "double");
        graph.add_edge("double", END);
        graph
    }

    /// Gate that interrupts until a resume decision arrives
    fn gated_graph() -> Graph {
        let mut graph = Graph::new();
        graph.add_node(
            "prepare",
            node_fn(|_| async { Ok(NodeOutput::update(json!({"prepared": true}))) }),
        );
        graph.add_node(
            "gate",
            node_fn(|state| async move {
                match state.get(RESUME_KEY) {
                    Some(decision) => Ok(NodeOutput::update(json!({"decision": decision}))),
                    None => Ok(NodeOutput::interrupt(json!({"awaiting": "approval"}))),
                }
            }),
        );
        graph.add_node(
            "finish",
            node_fn(|_| async { Ok(NodeOutput::update(json!({"finished": true}))) }),
        );
        graph.set_entry("prepare");
        graph.add_edge("prepare", "gate");
        graph.add_edge("gate", "finish");
        graph.add_edge("finish", END);
        graph
    }

    #[tokio::test]
    async fn test_linear_execution() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let compiled = counter_graph().compile(schema(), store, 5).unwrap();

        let outcome = compiled
            .invoke(GraphInput::start(json!({"n": 20})), "t-1")
            .await
            .unwrap();

        match outcome {
            GraphOutcome::Completed { state, trace } => {
                assert_eq!(state["n"], 42);
                assert_eq!(state["log"], json!(["inc", "double"]));
                assert_eq!(trace, vec!["inc", "double"]);
            }
            GraphOutcome::Interrupted { .. } => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_checkpoints_written_per_node() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let compiled = counter_graph().compile(schema(), store.clone(), 5).unwrap();

        compiled
            .invoke(GraphInput::start(json!({"n": 0})), "t-1")
            .await
            .unwrap();

        let log = store.list("t-1").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].next_node.as_deref(), Some("double"));
        assert!(log[1].next_node.is_none());
    }

    #[tokio::test]
    async fn test_conditional_routing() {
        let mut graph = Graph::new();
        graph.add_node(
            "check",
            node_fn(|_| async { Ok(NodeOutput::noop()) }),
        );
        graph.add_node(
            "high",
            node_fn(|_| async { Ok(NodeOutput::update(json!({"path": "high"}))) }),
        );
        graph.add_node(
            "low",
            node_fn(|_| async { Ok(NodeOutput::update(json!({"path": "low"}))) }),
        );
        graph.set_entry("check");
        graph.add_conditional_edge(
            "check",
            Arc::new(|state: &Value| {
                if state["score"].as_i64().unwrap_or(0) > 10 {
                    "high".to_string()
                } else {
                    "low".to_string()
                }
            }),
            vec!["high", "low"],
        );
        graph.add_edge("high", END);
        graph.add_edge("low", END);

        let store = Arc::new(MemoryCheckpointStore::new());
        let compiled = graph.compile(StateSchema::new(), store, 5).unwrap();

        let outcome = compiled
            .invoke(GraphInput::start(json!({"score": 50})), "t-high")
            .await
            .unwrap();
        assert_eq!(outcome.state()["path"], "high");

        let outcome = compiled
            .invoke(GraphInput::start(json!({"score": 1})), "t-low")
            .await
            .unwrap();
        assert_eq!(outcome.state()["path"], "low");
    }

    #[tokio::test]
    async fn test_undeclared_route_rejected() {
        let mut graph = Graph::new();
        graph.add_node("a", node_fn(|_| async { Ok(NodeOutput::noop()) }));
        graph.add_node("b", node_fn(|_| async { Ok(NodeOutput::noop()) }));
        graph.set_entry("a");
        // Router misbehaves: returns "b" but only declares END
        graph.add_conditional_edge(
            "a",
            Arc::new(|_: &Value| "b".to_string()),
            vec![END],
        );
        graph.add_edge("b", END);

        let store = Arc::new(MemoryCheckpointStore::new());
        let compiled = graph.compile(StateSchema::new(), store, 5).unwrap();

        let err = compiled
            .invoke(GraphInput::start(json!({})), "t-1")
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidRoute { .. }));
    }

    #[tokio::test]
    async fn test_interrupt_and_resume() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let compiled = gated_graph().compile(StateSchema::new(), store.clone(), 5).unwrap();

        let paused = compiled
            .invoke(GraphInput::start(json!({})), "t-1")
            .await
            .unwrap();

        match &paused {
            GraphOutcome::Interrupted { interrupt, trace, .. } => {
                assert_eq!(interrupt, &json!({"awaiting": "approval"}));
                assert_eq!(trace, &vec!["prepare".to_string(), "gate".to_string()]);
            }
            GraphOutcome::Completed { .. } => panic!("expected interrupt"),
        }

        let resumed = compiled
            .invoke(GraphInput::resume(json!({"action": "approve"})), "t-1")
            .await
            .unwrap();

        match resumed {
            GraphOutcome::Completed { state, trace } => {
                assert_eq!(state["decision"], json!({"action": "approve"}));
                assert_eq!(state["finished"], true);
                assert!(state.get(RESUME_KEY).is_none());
                assert_eq!(trace, vec!["gate", "finish"]);
            }
            GraphOutcome::Interrupted { .. } => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_resume_survives_recompile() {
        // Simulates crash recovery: a new compiled graph over the same store
        let store = Arc::new(MemoryCheckpointStore::new());

        let first = gated_graph().compile(StateSchema::new(), store.clone(), 5).unwrap();
        first
            .invoke(GraphInput::start(json!({})), "t-1")
            .await
            .unwrap();
        drop(first);

        let second = gated_graph().compile(StateSchema::new(), store, 5).unwrap();
        let outcome = second
            .invoke(GraphInput::resume(json!("approve")), "t-1")
            .await
            .unwrap();
        assert!(!outcome.is_interrupted());
        assert_eq!(outcome.state()["prepared"], true);
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint_fails() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let compiled = gated_graph().compile(StateSchema::new(), store, 5).unwrap();

        let err = compiled
            .invoke(GraphInput::resume(json!("approve")), "t-missing")
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::NoCheckpoint(_)));
    }

    #[tokio::test]
    async fn test_resume_on_completed_thread_fails() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let compiled = counter_graph().compile(schema(), store, 5).unwrap();

        compiled
            .invoke(GraphInput::start(json!({"n": 0})), "t-1")
            .await
            .unwrap();

        let err = compiled
            .invoke(GraphInput::resume(json!("approve")), "t-1")
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::NotInterrupted(_)));
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let mut graph = Graph::new();
        graph.add_node("spin", node_fn(|_| async { Ok(NodeOutput::noop()) }));
        graph.set_entry("spin");
        graph.add_conditional_edge(
            "spin",
            Arc::new(|_: &Value| "spin".to_string()),
            vec!["spin", END],
        );

        let store = Arc::new(MemoryCheckpointStore::new());
        let compiled = graph.compile(StateSchema::new(), store, 3).unwrap();

        let err = compiled
            .invoke(GraphInput::start(json!({})), "t-1")
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::IterationLimit { limit: 3, .. }));
    }

    #[tokio::test]
    async fn test_thread_isolation() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let compiled = gated_graph().compile(StateSchema::new(), store, 5).unwrap();

        compiled
            .invoke(GraphInput::start(json!({"who": "a"})), "t-a")
            .await
            .unwrap();
        compiled
            .invoke(GraphInput::start(json!({"who": "b"})), "t-b")
            .await
            .unwrap();

        let resumed = compiled
            .invoke(GraphInput::resume(json!("ok")), "t-a")
            .await
            .unwrap();
        assert_eq!(resumed.state()["who"], "a");
    }

    #[tokio::test]
    async fn test_fresh_start_continues_index_after_abandoned_thread() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let compiled = gated_graph().compile(StateSchema::new(), store.clone(), 5).unwrap();

        compiled
            .invoke(GraphInput::start(json!({})), "t-1")
            .await
            .unwrap();
        let abandoned_top = store.get_latest("t-1").await.unwrap().unwrap().index;

        // A later fresh pass (e.g. after a timeout) must not rewind the log
        compiled
            .invoke(GraphInput::start(json!({})), "t-1")
            .await
            .unwrap();
        let new_top = store.get_latest("t-1").await.unwrap().unwrap().index;
        assert!(new_top > abandoned_top);
    }
}
