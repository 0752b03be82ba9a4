//! 工作流节点图
//!
//! 固定的邻接表：入口为记忆检索，Done 只能经由记忆抽取到达；监督节点不能直接跳到 Done。
//! 编译时检查节点齐全，运行时每次转移都按邻接表校验。

use std::collections::{BTreeMap, HashMap};

use crate::workflow::types::*;

/// 已编译的节点图
pub struct WorkflowGraph {
    /// 邻接表：节点 -> 允许的后继
    adjacency: BTreeMap<NodeId, Vec<NodeId>>,
    nodes: HashMap<NodeId, SharedNode>,
}

impl WorkflowGraph {
    /// 入口节点
    pub const ENTRY: NodeId = NodeId::MemoryRetrieval;

    /// 固定转移表
    pub fn transitions() -> BTreeMap<NodeId, Vec<NodeId>> {
        BTreeMap::from([
            (NodeId::MemoryRetrieval, vec![NodeId::Supervisor]),
            (
                NodeId::Supervisor,
                vec![NodeId::Information, NodeId::Booking, NodeId::MemoryExtraction],
            ),
            (NodeId::Information, vec![NodeId::Supervisor]),
            (NodeId::Booking, vec![NodeId::Supervisor]),
            (NodeId::MemoryExtraction, vec![NodeId::Done]),
            (NodeId::Done, Vec::new()),
        ])
    }

    /// 编译：除 Done 外每个节点都必须注册，且注册键与节点自报的 id 一致
    pub fn compile(nodes: HashMap<NodeId, SharedNode>) -> Result<Self, WorkflowError> {
        for (id, node) in &nodes {
            if *id == NodeId::Done {
                return Err(WorkflowError::InvalidConfiguration(
                    "the done state cannot have a node".to_string(),
                ));
            }
            if node.id() != *id {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "node registered as {id} reports id {}",
                    node.id()
                )));
            }
        }
        if let Some(missing) = NodeId::ALL
            .into_iter()
            .filter(|id| *id != NodeId::Done)
            .find(|id| !nodes.contains_key(id))
        {
            return Err(WorkflowError::MissingNode(missing));
        }

        Ok(Self {
            adjacency: Self::transitions(),
            nodes,
        })
    }

    pub fn node(&self, id: NodeId) -> Result<&SharedNode, WorkflowError> {
        self.nodes.get(&id).ok_or(WorkflowError::MissingNode(id))
    }

    pub fn successors(&self, from: NodeId) -> &[NodeId] {
        self.adjacency.get(&from).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 校验一次转移是否在邻接表中
    pub fn validate(&self, from: NodeId, to: NodeId) -> Result<(), WorkflowError> {
        if self.successors(from).contains(&to) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition { from, to })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Fixed(NodeId);

    #[async_trait]
    impl Node for Fixed {
        fn id(&self) -> NodeId {
            self.0
        }

        async fn run(&self, _: &ConversationState, _: &RequestContext) -> Command {
            Command::goto(NodeId::Done)
        }
    }

    fn all_nodes() -> HashMap<NodeId, SharedNode> {
        NodeId::ALL
            .into_iter()
            .filter(|id| *id != NodeId::Done)
            .map(|id| (id, Arc::new(Fixed(id)) as SharedNode))
            .collect()
    }

    #[test]
    fn test_supervisor_never_reaches_done_directly() {
        let graph = WorkflowGraph::compile(all_nodes()).unwrap();
        assert!(graph.validate(NodeId::Supervisor, NodeId::Done).is_err());
        assert!(graph.validate(NodeId::Supervisor, NodeId::MemoryExtraction).is_ok());
        assert!(graph.validate(NodeId::MemoryExtraction, NodeId::Done).is_ok());
        assert!(graph.validate(NodeId::Booking, NodeId::Information).is_err());
    }

    #[test]
    fn test_compile_rejects_missing_node() {
        let mut nodes = all_nodes();
        nodes.remove(&NodeId::Booking);
        assert_eq!(
            WorkflowGraph::compile(nodes).err(),
            Some(WorkflowError::MissingNode(NodeId::Booking))
        );
    }

    #[test]
    fn test_compile_rejects_mismatched_id() {
        let mut nodes = all_nodes();
        nodes.insert(NodeId::Booking, Arc::new(Fixed(NodeId::Information)));
        assert!(matches!(
            WorkflowGraph::compile(nodes),
            Err(WorkflowError::InvalidConfiguration(_))
        ));
    }
}
