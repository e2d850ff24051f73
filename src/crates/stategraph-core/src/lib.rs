//! Interruptible graph runtime for durable agent workflows
//!
//! A graph is an immutable definition of named nodes connected by direct or
//! conditional edges. Nodes are pure async functions over a JSON state record
//! whose fields carry declared reducers. A node may return a partial state
//! update or raise an *interrupt* - a structured value that suspends the
//! thread at that node until a resume value arrives.
//!
//! Interrupts are modeled as a distinct return value ([`NodeOutput::Interrupt`]),
//! not as an unwinding error: the execution loop switches on the output
//! explicitly, and the resume path is a plain argument pass.
//!
//! # Execution model
//!
//! 1. Build a [`Graph`] with nodes and edges, then [`Graph::compile`] it once
//!    against a [`CheckpointStore`] and reuse the [`CompiledGraph`] for all
//!    invocations.
//! 2. [`CompiledGraph::invoke`] with [`GraphInput::Start`] runs from the entry
//!    node, checkpointing after every node, until `END` or an interrupt.
//! 3. Invoking the same `thread_id` with [`GraphInput::Resume`] reloads the
//!    latest checkpoint and re-enters the suspended node with the resume
//!    value available under [`RESUME_KEY`].
//!
//! Two invocations with the same `thread_id` share history; two with distinct
//! thread ids do not.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut graph = Graph::new();
//! graph.add_node("greet", node_fn(|state| async move {
//!     Ok(NodeOutput::update(json!({"greeting": "hello"})))
//! }));
//! graph.set_entry("greet");
//! graph.add_edge("greet", END);
//!
//! let compiled = graph.compile(StateSchema::new(), store, 5)?;
//! let outcome = compiled.invoke(GraphInput::start(json!({})), "thread-1").await?;
//! ```

pub mod compiled;
pub mod error;
pub mod graph;
pub mod node;
pub mod state;

pub use compiled::{CompiledGraph, GraphInput, GraphOutcome, RESUME_KEY};
pub use error::{GraphError, Result};
pub use graph::{Edge, Graph, NodeId, NodeSpec, RouterFn, END, START};
pub use node::{node_fn, NodeFn, NodeFuture, NodeOutput};
pub use state::{apply_delta, Reducer, StateSchema};
