//! 能力节点（信息 / 预约）
//!
//! 每个变体启动时构建一次 CapabilityProfile（系统提示 + 工具集），调用时运行有界的工具循环：
//! 模型输出 JSON 工具调用则执行工具并回传结果，输出纯文本即为最终回复。整个循环作为一次调用经过 `llm_api` 熔断器。
//! 任何错误都在节点内转为带节点名的降级回复，节点总是回到监督节点。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::llm::{CompletionRequest, ToolSpec};
use crate::memory::{MemoryStore, Message};
use crate::nodes::prompts::{booking_prompt, information_prompt, memory_instruction};
use crate::nodes::{guarded, NodeServices};
use crate::tools::{
    booking_tools, information_tools, parse_model_turn, ModelTurn, Schedule, ToolContext,
    ToolExecutor,
};
use crate::workflow::{Command, ConversationState, Node, NodeId, RequestContext, StatePatch};

/// 默认工具轮次上限
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 15;

const GENERIC_FAILURE: &str = "I encountered an error processing your request. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Information,
    Booking,
}

impl CapabilityKind {
    pub fn node_id(&self) -> NodeId {
        match self {
            CapabilityKind::Information => NodeId::Information,
            CapabilityKind::Booking => NodeId::Booking,
        }
    }

    /// 节点名，同时用于标记回复消息与指标
    pub fn name(&self) -> &'static str {
        self.node_id().as_str()
    }
}

/// 能力画像：系统提示与工具集，启动时构建一次
#[derive(Clone)]
pub struct CapabilityProfile {
    pub kind: CapabilityKind,
    pub system_prompt: String,
    pub tools: ToolExecutor,
}

impl CapabilityProfile {
    pub fn new(kind: CapabilityKind, system_prompt: impl Into<String>, tools: ToolExecutor) -> Self {
        Self {
            kind,
            system_prompt: system_prompt.into(),
            tools,
        }
    }

    pub fn information(
        schedule: &Schedule,
        store: &Arc<dyn MemoryStore>,
        tool_timeout_secs: u64,
    ) -> Self {
        Self::new(
            CapabilityKind::Information,
            information_prompt(current_year()),
            ToolExecutor::new(information_tools(schedule, store), tool_timeout_secs),
        )
    }

    pub fn booking(schedule: &Schedule, store: &Arc<dyn MemoryStore>, tool_timeout_secs: u64) -> Self {
        Self::new(
            CapabilityKind::Booking,
            booking_prompt(current_year()),
            ToolExecutor::new(booking_tools(schedule, store), tool_timeout_secs),
        )
    }
}

fn current_year() -> i32 {
    use chrono::Datelike;
    chrono::Local::now().year()
}

pub struct CapabilityNode {
    profile: CapabilityProfile,
    tool_specs: Vec<ToolSpec>,
    services: NodeServices,
    recovery: RecoveryEngine,
    max_tool_rounds: usize,
}

impl CapabilityNode {
    pub fn new(profile: CapabilityProfile, services: NodeServices) -> Self {
        let tool_specs = profile.tools.specs();
        Self {
            profile,
            tool_specs,
            services,
            recovery: RecoveryEngine::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn kind(&self) -> CapabilityKind {
        self.profile.kind
    }

    fn initial_messages(&self, state: &ConversationState) -> Vec<Message> {
        let mut system = self.profile.system_prompt.clone();
        if let Some(block) = state.memory_context.as_deref().filter(|b| !b.is_empty()) {
            system.push_str(&memory_instruction(block));
        }
        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        messages.push(Message::system(system));
        messages.extend(state.messages.iter().cloned());
        messages
    }

    /// 工具循环：返回最终回复文本
    async fn run_agent(&self, state: &ConversationState) -> Result<String, AgentError> {
        let mut messages = self.initial_messages(state);
        let tool_ctx = ToolContext {
            subject_id: state.subject_id.clone(),
            tenant_id: state.tenant_id.clone(),
        };

        for round in 0..self.max_tool_rounds {
            let request = CompletionRequest::new(messages.clone()).with_tools(self.tool_specs.clone());
            let output = self.services.llm.complete(request).await?;

            match parse_model_turn(&output) {
                Ok(ModelTurn::Reply(text)) => return Ok(text),
                Ok(ModelTurn::ToolCall(call)) => {
                    tracing::debug!(node = self.kind().name(), round, tool = %call.tool, "Tool call");
                    messages.push(Message::assistant(output.clone()));
                    match self.profile.tools.execute(&call.tool, call.args, &tool_ctx).await {
                        Ok(observation) => messages.push(Message::tool(call.tool, observation)),
                        Err(e) => self.feed_back(&mut messages, e, Some(&call.tool))?,
                    }
                }
                Err(e) => {
                    messages.push(Message::assistant(output.clone()));
                    self.feed_back(&mut messages, e, None)?;
                }
            }
        }

        Err(AgentError::ToolRoundsExhausted(self.max_tool_rounds))
    }

    /// 可恢复的错误反馈给模型，其余错误终止循环
    fn feed_back(
        &self,
        messages: &mut Vec<Message>,
        err: AgentError,
        tool: Option<&str>,
    ) -> Result<(), AgentError> {
        match self.recovery.handle(&err, tool) {
            RecoveryAction::RetryWithPrompt(prompt) => {
                messages.push(Message::system(prompt));
                Ok(())
            }
            RecoveryAction::ReportToolError { tool, message } => {
                tracing::warn!(node = self.kind().name(), tool = %tool, "Tool failed: {}", err);
                messages.push(Message::tool(tool, message));
                Ok(())
            }
            RecoveryAction::Abort => Err(err),
        }
    }
}

#[async_trait]
impl Node for CapabilityNode {
    fn id(&self) -> NodeId {
        self.profile.kind.node_id()
    }

    async fn run(&self, state: &ConversationState, ctx: &RequestContext) -> Command {
        let started = Instant::now();
        let name = self.kind().name();
        tracing::info!(subject = %state.subject_id, tenant = %state.tenant_id, node = name, "Capability node invoked");

        let breaker = self.services.llm_breaker();
        let result = guarded(&breaker, ctx, || self.run_agent(state)).await;

        let (content, error) = match result {
            Ok(reply) => (reply, None),
            Err(e) if e.is_breaker_open() => {
                tracing::error!(node = name, "Circuit breaker open: {}", e);
                (format!("Service temporarily unavailable: {e}"), Some(e.to_string()))
            }
            Err(e) => {
                tracing::error!(node = name, "Capability node failed: {}", e);
                (GENERIC_FAILURE.to_string(), Some(e.to_string()))
            }
        };

        self.services
            .record_execution(name, started, error.as_deref(), state);

        Command::goto(NodeId::Supervisor)
            .with_patch(StatePatch::new().message(Message::assistant(content).named(name)))
    }
}
