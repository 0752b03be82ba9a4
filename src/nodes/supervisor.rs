//! 路由监督节点
//!
//! 经 `llm_api` 熔断器请求结构化的 RoutingDecision。熔断拒绝、模型错误、输出无法解析或 next 非法时
//! 一律强制 terminate（理由为错误信息），保证请求总能结束；terminate 总是先转到记忆抽取。

use std::time::Instant;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::CompletionRequest;
use crate::memory::{Message, Role};
use crate::nodes::prompts::{identification_message, SUPERVISOR_PROMPT};
use crate::nodes::{guarded, NodeServices};
use crate::observability::RoutingRecord;
use crate::tools::extract_json;
use crate::workflow::{
    Command, ConversationState, Node, NodeId, RequestContext, Route, RoutingDecision, StatePatch,
};

const NODE_NAME: &str = "supervisor";
const INPUT_SUMMARY_CHARS: usize = 200;

pub struct SupervisorNode {
    services: NodeServices,
    system_prompt: String,
    response_schema: serde_json::Value,
}

impl SupervisorNode {
    pub fn new(services: NodeServices) -> Self {
        Self {
            services,
            system_prompt: SUPERVISOR_PROMPT.to_string(),
            response_schema: RoutingDecision::schema(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn build_request(&self, state: &ConversationState) -> CompletionRequest {
        let mut system = self.system_prompt.clone();
        if let Some(block) = state.memory_context.as_deref().filter(|b| !b.is_empty()) {
            system.push_str("\n\n");
            system.push_str(block);
        }

        let mut messages = Vec::with_capacity(state.messages.len() + 2);
        messages.push(Message::system(system));
        messages.push(Message::user(identification_message(&state.subject_id)));
        messages.extend(state.messages.iter().cloned());
        CompletionRequest::new(messages).with_schema(self.response_schema.clone())
    }

    async fn decide(
        &self,
        state: &ConversationState,
        ctx: &RequestContext,
    ) -> Result<RoutingDecision, AgentError> {
        let request = self.build_request(state);
        let llm = self.services.llm.clone();
        let breaker = self.services.llm_breaker();
        // 解析放在熔断器内：持续返回无效输出的模型按故障计
        guarded(&breaker, ctx, move || async move {
            let raw = llm.complete(request).await?;
            parse_decision(&raw)
        })
        .await
    }
}

/// 解析模型输出为路由决策
pub fn parse_decision(raw: &str) -> Result<RoutingDecision, AgentError> {
    let json = extract_json(raw)
        .ok_or_else(|| AgentError::JsonParseError(format!("no routing decision in: {raw}")))?;
    serde_json::from_str(json).map_err(|e| AgentError::JsonParseError(format!("{e}: {json}")))
}

/// 首轮（历史中只有一条用户消息）返回原始查询
fn first_pass_query(state: &ConversationState) -> Option<&str> {
    match state.messages.as_slice() {
        [only] if only.role == Role::User => Some(only.content.as_str()),
        _ => None,
    }
}

#[async_trait]
impl Node for SupervisorNode {
    fn id(&self) -> NodeId {
        NodeId::Supervisor
    }

    async fn run(&self, state: &ConversationState, ctx: &RequestContext) -> Command {
        let started = Instant::now();
        tracing::info!(subject = %state.subject_id, tenant = %state.tenant_id, "Supervisor node invoked");

        let query = first_pass_query(state);
        let (decision, error) = match self.decide(state, ctx).await {
            Ok(decision) => (decision, None),
            Err(e) => {
                let reasoning = if e.is_breaker_open() {
                    format!("Circuit breaker: {e}")
                } else {
                    format!("Routing failed: {e}")
                };
                tracing::error!(subject = %state.subject_id, "Supervisor decision failed, terminating: {}", e);
                (RoutingDecision::terminate(reasoning), Some(e.to_string()))
            }
        };

        tracing::info!(subject = %state.subject_id, route = %decision.next, "Supervisor routing decision");
        tracing::debug!(reasoning = %decision.reasoning, "Supervisor reasoning");

        let available: Vec<&str> = Route::ALL.iter().map(Route::as_str).collect();
        let summary: String = query
            .map(|q| q.chars().take(INPUT_SUMMARY_CHARS).collect())
            .unwrap_or_else(|| "(continuation)".to_string());
        self.services.decisions().routing_decision(RoutingRecord {
            agent_name: NODE_NAME,
            available_routes: &available,
            selected_route: decision.next.as_str(),
            reasoning: &decision.reasoning,
            input_summary: &summary,
            subject_id: &state.subject_id,
            tenant_id: &state.tenant_id,
        });
        self.services
            .record_execution(NODE_NAME, started, error.as_deref(), state);

        let mut patch = StatePatch::new()
            .route(decision.next)
            .reasoning(decision.reasoning);
        if let Some(query) = query {
            patch = patch
                .query(query)
                .message(Message::user(identification_message(&state.subject_id)));
        }

        Command::goto(decision.next.target()).with_patch(patch)
    }
}
