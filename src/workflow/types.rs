//! 工作流类型定义
//!
//! 定义节点标识、路由决策、会话状态及其补丁、节点返回的 Command、请求上下文与错误类型

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::memory::Message;

/// 图中的节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    /// 请求入口：注入长期记忆上下文
    MemoryRetrieval,
    /// 路由决策
    Supervisor,
    /// 信息查询能力节点
    Information,
    /// 预约能力节点
    Booking,
    /// 出口前的记忆抽取
    MemoryExtraction,
    /// 终止
    Done,
}

impl NodeId {
    pub const ALL: [NodeId; 6] = [
        NodeId::MemoryRetrieval,
        NodeId::Supervisor,
        NodeId::Information,
        NodeId::Booking,
        NodeId::MemoryExtraction,
        NodeId::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::MemoryRetrieval => "memory_retrieval",
            NodeId::Supervisor => "supervisor",
            NodeId::Information => "information_node",
            NodeId::Booking => "booking_node",
            NodeId::MemoryExtraction => "memory_extraction",
            NodeId::Done => "done",
        }
    }

    /// 是否为能力节点
    pub fn is_capability(&self) -> bool {
        matches!(self, NodeId::Information | NodeId::Booking)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 监督节点可选的下一步（封闭枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// 查询医生/专科空闲时段等信息
    #[serde(alias = "information_node")]
    Information,
    /// 预约、取消、改约
    #[serde(alias = "booking_node")]
    Booking,
    /// 结束本次请求
    #[serde(alias = "FINISH", alias = "finish")]
    Terminate,
}

impl Route {
    pub const ALL: [Route; 3] = [Route::Information, Route::Booking, Route::Terminate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Information => "information",
            Route::Booking => "booking",
            Route::Terminate => "terminate",
        }
    }

    /// 路由对应的目标节点；Terminate 一律先经过记忆抽取
    pub fn target(&self) -> NodeId {
        match self {
            Route::Information => NodeId::Information,
            Route::Booking => NodeId::Booking,
            Route::Terminate => NodeId::MemoryExtraction,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 监督节点的结构化输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RoutingDecision {
    /// 下一步：information / booking / terminate
    pub next: Route,
    /// 选择理由
    pub reasoning: String,
}

impl RoutingDecision {
    pub fn terminate(reasoning: impl Into<String>) -> Self {
        Self {
            next: Route::Terminate,
            reasoning: reasoning.into(),
        }
    }

    /// 结构化输出的 JSON Schema（随请求发给模型）
    pub fn schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(RoutingDecision)).unwrap_or_default()
    }
}

/// 单个请求在图中流转的会话状态；节点只读，修改通过 StatePatch
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    /// 对话历史（只追加）
    pub messages: Vec<Message>,
    /// 会话主体（患者 id），请求内不变
    pub subject_id: String,
    /// 租户隔离键，请求内不变
    pub tenant_id: String,
    /// 最近一次路由决策
    pub route: Option<Route>,
    /// 最近一次路由理由
    pub reasoning: Option<String>,
    /// 请求开始时注入的记忆上下文块
    pub memory_context: Option<String>,
    /// 首轮监督节点带出的原始查询
    pub query: Option<String>,
}

impl ConversationState {
    pub fn new(
        subject_id: impl Into<String>,
        tenant_id: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            messages,
            subject_id: subject_id.into(),
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// 应用补丁：消息追加，标量字段出现时覆盖
    pub fn apply(&mut self, patch: StatePatch) {
        self.messages.extend(patch.messages);
        if patch.route.is_some() {
            self.route = patch.route;
        }
        if patch.reasoning.is_some() {
            self.reasoning = patch.reasoning;
        }
        if patch.memory_context.is_some() {
            self.memory_context = patch.memory_context;
        }
        if patch.query.is_some() {
            self.query = patch.query;
        }
    }
}

/// 节点返回的部分状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub messages: Vec<Message>,
    pub route: Option<Route>,
    pub reasoning: Option<String>,
    pub memory_context: Option<String>,
    pub query: Option<String>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn route(mut self, route: Route) -> Self {
        self.route = Some(route);
        self
    }

    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn memory_context(mut self, block: impl Into<String>) -> Self {
        self.memory_context = Some(block.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// 节点的返回：下一节点 + 状态补丁
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub goto: NodeId,
    pub patch: StatePatch,
}

impl Command {
    pub fn goto(goto: NodeId) -> Self {
        Self {
            goto,
            patch: StatePatch::default(),
        }
    }

    pub fn with_patch(mut self, patch: StatePatch) -> Self {
        self.patch = patch;
        self
    }
}

/// 单次请求的运行时上下文（截止时间、运行 id）
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub run_id: String,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4()),
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// 剩余时间；None 表示无截止时间
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }
}

/// 图节点：根据当前状态给出下一节点与补丁
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    async fn run(&self, state: &ConversationState, ctx: &RequestContext) -> Command;
}

pub type SharedNode = Arc<dyn Node>;

/// 一次请求的输入
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub subject_id: String,
    pub tenant_id: String,
    pub message: String,
    /// 覆盖默认的请求超时
    pub deadline: Option<Duration>,
}

impl RunRequest {
    pub fn new(subject_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            tenant_id: "default".to_string(),
            message: message.into(),
            deadline: None,
        }
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// 一次请求的结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// 最后一条助手消息
    pub final_message: String,
    /// 最后一次走过的能力路由；未进入能力节点时为最终决策
    pub last_route: Option<Route>,
    /// 最后一次路由理由
    pub last_reasoning: Option<String>,
    /// 节点转移次数
    pub steps: usize,
    /// 终态会话
    pub state: ConversationState,
}

/// 工作流错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Step limit exceeded: {steps} transitions (limit {limit})")]
    StepLimitExceeded { limit: usize, steps: usize },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: NodeId, to: NodeId },

    #[error("Missing node: {0}")]
    MissingNode(NodeId),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
