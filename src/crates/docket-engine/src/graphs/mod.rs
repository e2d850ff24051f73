//! Case graphs
//!
//! Two graphs share one state schema and most nodes:
//!
//! - **Initial-request**: `load_context → draft_initial_request →
//!   safety_check → gate_or_execute → (execute_action | commit_state |
//!   adjust-loop) → schedule_followups → commit_state`. Scheduled follow-ups
//!   reuse this graph with the action switched to a follow-up send.
//! - **Inbound-response**: `load_context → classify_inbound →
//!   update_constraints → decide_next_action → (draft_response |
//!   execute_action | commit_state) → safety_check → gate_or_execute →
//!   (execute_action | decide_next_action after an adjust | commit_state)`.
//!
//! The only cycle - gate back to decide after an ADJUST decision - is
//! bounded by the runtime's per-node visit limit.

pub mod nodes;
pub mod policy;
pub mod state;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::graphs::nodes::NodeServices;
use crate::graphs::state::schema;
use std::sync::Arc;
use stategraph_checkpoint::CheckpointStore;
use stategraph_core::{CompiledGraph, Graph, END};

/// Node names shared by both graphs
pub mod names {
    /// Loads case, message, and proposal context into state
    pub const LOAD_CONTEXT: &str = "load_context";
    /// Classifies the latest inbound message
    pub const CLASSIFY_INBOUND: &str = "classify_inbound";
    /// Merges classification-derived constraints into the case
    pub const UPDATE_CONSTRAINTS: &str = "update_constraints";
    /// Applies decision policy to pick an action
    pub const DECIDE_NEXT_ACTION: &str = "decide_next_action";
    /// Drafts the initial (or follow-up) outbound request
    pub const DRAFT_INITIAL_REQUEST: &str = "draft_initial_request";
    /// Drafts the response to an inbound message
    pub const DRAFT_RESPONSE: &str = "draft_response";
    /// Applies hard and soft safety rules
    pub const SAFETY_CHECK: &str = "safety_check";
    /// Persists the proposal and gates or proceeds
    pub const GATE_OR_EXECUTE: &str = "gate_or_execute";
    /// Claims and dispatches the side effect
    pub const EXECUTE_ACTION: &str = "execute_action";
    /// Schedules the next follow-up (initial graph only)
    pub const SCHEDULE_FOLLOWUPS: &str = "schedule_followups";
    /// Writes final case status changes
    pub const COMMIT_STATE: &str = "commit_state";
}

/// The two compiled case graphs
pub struct CaseGraphs {
    /// Initial-request (and scheduled follow-up) graph
    pub initial: CompiledGraph,
    /// Inbound-response graph
    pub inbound: CompiledGraph,
}

impl CaseGraphs {
    /// Build and compile both graphs against a checkpoint store
    pub fn compile(
        services: Arc<NodeServices>,
        checkpointer: Arc<dyn CheckpointStore>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let initial = build_initial_graph(services.clone()).compile(
            schema(),
            checkpointer.clone(),
            config.max_node_visits,
        )?;
        let inbound = build_inbound_graph(services).compile(
            schema(),
            checkpointer,
            config.max_node_visits,
        )?;
        Ok(Self { initial, inbound })
    }
}

/// Wire the initial-request graph
pub fn build_initial_graph(services: Arc<NodeServices>) -> Graph {
    use names::*;

    let mut graph = Graph::new();
    graph.add_node(LOAD_CONTEXT, nodes::load_context(services.clone()));
    graph.add_node(
        DRAFT_INITIAL_REQUEST,
        nodes::draft_initial_request(services.clone()),
    );
    graph.add_node(SAFETY_CHECK, nodes::safety_check(services.clone()));
    graph.add_node(GATE_OR_EXECUTE, nodes::gate_or_execute(services.clone(), true));
    graph.add_node(EXECUTE_ACTION, nodes::execute_action(services.clone()));
    graph.add_node(
        SCHEDULE_FOLLOWUPS,
        nodes::schedule_followups(services.clone()),
    );
    graph.add_node(COMMIT_STATE, nodes::commit_state(services));

    graph.set_entry(LOAD_CONTEXT);
    graph.add_edge(LOAD_CONTEXT, DRAFT_INITIAL_REQUEST);
    graph.add_edge(DRAFT_INITIAL_REQUEST, SAFETY_CHECK);
    graph.add_edge(SAFETY_CHECK, GATE_OR_EXECUTE);
    graph.add_conditional_edge(
        GATE_OR_EXECUTE,
        nodes::next_node_router(
            GATE_OR_EXECUTE,
            COMMIT_STATE,
            vec![EXECUTE_ACTION, DRAFT_INITIAL_REQUEST, COMMIT_STATE],
        ),
        vec![EXECUTE_ACTION, DRAFT_INITIAL_REQUEST, COMMIT_STATE],
    );
    graph.add_edge(EXECUTE_ACTION, SCHEDULE_FOLLOWUPS);
    graph.add_edge(SCHEDULE_FOLLOWUPS, COMMIT_STATE);
    graph.add_edge(COMMIT_STATE, END);
    graph
}

/// Wire the inbound-response graph
pub fn build_inbound_graph(services: Arc<NodeServices>) -> Graph {
    use names::*;

    let mut graph = Graph::new();
    graph.add_node(LOAD_CONTEXT, nodes::load_context(services.clone()));
    graph.add_node(CLASSIFY_INBOUND, nodes::classify_inbound(services.clone()));
    graph.add_node(
        UPDATE_CONSTRAINTS,
        nodes::update_constraints(services.clone()),
    );
    graph.add_node(
        DECIDE_NEXT_ACTION,
        nodes::decide_next_action(services.clone()),
    );
    graph.add_node(DRAFT_RESPONSE, nodes::draft_response(services.clone()));
    graph.add_node(SAFETY_CHECK, nodes::safety_check(services.clone()));
    graph.add_node(GATE_OR_EXECUTE, nodes::gate_or_execute(services.clone(), false));
    graph.add_node(EXECUTE_ACTION, nodes::execute_action(services.clone()));
    graph.add_node(COMMIT_STATE, nodes::commit_state(services));

    graph.set_entry(LOAD_CONTEXT);
    graph.add_edge(LOAD_CONTEXT, CLASSIFY_INBOUND);
    graph.add_edge(CLASSIFY_INBOUND, UPDATE_CONSTRAINTS);
    graph.add_edge(UPDATE_CONSTRAINTS, DECIDE_NEXT_ACTION);
    graph.add_conditional_edge(
        DECIDE_NEXT_ACTION,
        nodes::next_node_router(
            DECIDE_NEXT_ACTION,
            COMMIT_STATE,
            vec![DRAFT_RESPONSE, EXECUTE_ACTION, COMMIT_STATE],
        ),
        vec![DRAFT_RESPONSE, EXECUTE_ACTION, COMMIT_STATE],
    );
    graph.add_edge(DRAFT_RESPONSE, SAFETY_CHECK);
    graph.add_edge(SAFETY_CHECK, GATE_OR_EXECUTE);
    graph.add_conditional_edge(
        GATE_OR_EXECUTE,
        nodes::next_node_router(
            GATE_OR_EXECUTE,
            COMMIT_STATE,
            vec![EXECUTE_ACTION, DECIDE_NEXT_ACTION, COMMIT_STATE],
        ),
        vec![EXECUTE_ACTION, DECIDE_NEXT_ACTION, COMMIT_STATE],
    );
    graph.add_edge(EXECUTE_ACTION, COMMIT_STATE);
    graph.add_edge(COMMIT_STATE, END);
    graph
}
