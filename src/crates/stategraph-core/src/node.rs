//! Node output and executor types
//!
//! Nodes are pure async functions of the current state. They return a
//! [`NodeOutput`]: either a partial state update that the runtime merges via
//! the schema's reducers, or an interrupt payload that suspends the thread at
//! the node until a resume value arrives.

use crate::error::GraphError;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Control value returned by every node invocation
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// Partial state delta to merge into the current state
    Update(Value),

    /// Suspend the thread at this node, carrying a structured payload
    ///
    /// The runtime writes a checkpoint tagged with this node and the payload,
    /// then returns [`GraphOutcome::Interrupted`] to the caller. A later
    /// invocation with [`GraphInput::Resume`] re-enters the node with the
    /// resume value injected into state.
    ///
    /// [`GraphOutcome::Interrupted`]: crate::compiled::GraphOutcome::Interrupted
    /// [`GraphInput::Resume`]: crate::compiled::GraphInput::Resume
    Interrupt(Value),
}

impl NodeOutput {
    /// Convenience constructor for an update delta
    pub fn update(delta: Value) -> Self {
        NodeOutput::Update(delta)
    }

    /// Convenience constructor for an empty update (node made no changes)
    pub fn noop() -> Self {
        NodeOutput::Update(Value::Object(serde_json::Map::new()))
    }

    /// Convenience constructor for an interrupt
    pub fn interrupt(payload: Value) -> Self {
        NodeOutput::Interrupt(payload)
    }
}

/// Boxed future returned by node executors
pub type NodeFuture = BoxFuture<'static, std::result::Result<NodeOutput, GraphError>>;

/// Async executor function for a node
///
/// Receives the full current state and produces a [`NodeOutput`]. Executors
/// must be `Send + Sync` so a compiled graph can serve concurrent threads.
pub type NodeFn = Arc<dyn Fn(Value) -> NodeFuture + Send + Sync>;

/// Wrap an async closure as a [`NodeFn`]
///
/// ```rust,ignore
/// let node = node_fn(|state| async move {
///     Ok(NodeOutput::update(json!({"seen": true})))
/// });
/// ```
pub fn node_fn<F, Fut>(f: F) -> NodeFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<NodeOutput, GraphError>> + Send + 'static,
{
    Arc::new(move |state| Box::pin(f(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_node_fn_wraps_closure() {
        let node = node_fn(|state: Value| async move {
            let n = state["n"].as_i64().unwrap_or(0);
            Ok(NodeOutput::update(json!({"n": n + 1})))
        });

        let out = node(json!({"n": 41})).await.unwrap();
        assert_eq!(out, NodeOutput::Update(json!({"n": 42})));
    }

    #[test]
    fn test_noop_is_empty_object() {
        match NodeOutput::noop() {
            NodeOutput::Update(v) => assert_eq!(v, json!({})),
            NodeOutput::Interrupt(_) => panic!("expected update"),
        }
    }
}
