//! 工作流：节点图、构建器与执行引擎

pub mod builder;
pub mod engine;
pub mod graph;
pub mod types;

pub use builder::{WorkflowBuilder, DEFAULT_STEP_LIMIT};
pub use engine::{WorkflowEngine, FALLBACK_MESSAGE};
pub use graph::WorkflowGraph;
pub use types::{
    Command, ConversationState, Node, NodeId, RequestContext, Route, RoutingDecision, RunOutcome,
    RunRequest, SharedNode, StatePatch, WorkflowError,
};
