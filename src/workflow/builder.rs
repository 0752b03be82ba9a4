//! 工作流构建器
//!
//! 提供流畅的 API 注册节点、设置步数上限 / 能力节点轮次上限 / 请求超时，build() 时编译节点图

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::observability::MetricsCollector;
use crate::resilience::BreakerRegistry;
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::*;

/// 默认步数上限
pub const DEFAULT_STEP_LIMIT: usize = 20;

/// 工作流构建器
pub struct WorkflowBuilder {
    nodes: HashMap<NodeId, SharedNode>,
    breakers: Option<Arc<BreakerRegistry>>,
    metrics: Option<Arc<MetricsCollector>>,
    step_limit: usize,
    max_capability_passes: Option<usize>,
    request_timeout: Option<Duration>,
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            breakers: None,
            metrics: None,
            step_limit: DEFAULT_STEP_LIMIT,
            max_capability_passes: None,
            request_timeout: None,
        }
    }

    /// 注册节点（同 id 后注册的覆盖先注册的）
    pub fn node(self, node: impl Node + 'static) -> Self {
        self.node_arc(Arc::new(node))
    }

    pub fn node_arc(mut self, node: SharedNode) -> Self {
        self.nodes.insert(node.id(), node);
        self
    }

    /// 与节点共享的熔断器注册表；未设置时使用默认配置新建
    pub fn breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// 单个能力节点在一次请求中的最大进入次数
    pub fn max_capability_passes(mut self, cap: Option<usize>) -> Self {
        self.max_capability_passes = cap;
        self
    }

    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// 构建引擎
    pub fn build(self) -> Result<WorkflowEngine, WorkflowError> {
        if self.step_limit == 0 {
            return Err(WorkflowError::InvalidConfiguration(
                "step_limit must be at least 1".to_string(),
            ));
        }
        if self.max_capability_passes == Some(0) {
            return Err(WorkflowError::InvalidConfiguration(
                "max_capability_passes must be at least 1 when set".to_string(),
            ));
        }

        let graph = WorkflowGraph::compile(self.nodes)?;
        Ok(WorkflowEngine::new(
            graph,
            self.breakers.unwrap_or_default(),
            self.metrics,
            self.step_limit,
            self.max_capability_passes,
            self.request_timeout,
        ))
    }
}
