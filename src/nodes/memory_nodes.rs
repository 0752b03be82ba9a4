//! 记忆节点：请求入口的记忆检索与出口前的记忆抽取
//!
//! 两者都是尽力而为：存储失败只记日志，降级为空上下文，不影响请求。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::memory::{MemoryContext, MemoryError, MemoryStore, Message, Role};
use crate::nodes::prompts::IDENTIFICATION_PREFIX;
use crate::observability::MetricsSink;
use crate::resilience::RetryPolicy;
use crate::workflow::{Command, ConversationState, Node, NodeId, RequestContext, StatePatch};

/// 入口节点：按最后一条消息检索长期记忆并注入上下文块
pub struct MemoryRetrievalNode {
    store: Arc<dyn MemoryStore>,
    retry: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl MemoryRetrievalNode {
    pub fn new(store: Arc<dyn MemoryStore>, retry: RetryPolicy, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            store,
            retry,
            metrics,
        }
    }

    async fn retrieve(&self, state: &ConversationState) -> Result<MemoryContext, MemoryError> {
        let query = state
            .last_message()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let records = self
            .retry
            .run(
                || self.store.recall(&state.subject_id, query, &state.tenant_id),
                |e: &MemoryError| matches!(e, MemoryError::Unavailable(_)),
            )
            .await?;
        Ok(MemoryContext::from_records(state.subject_id.clone(), &records))
    }
}

#[async_trait]
impl Node for MemoryRetrievalNode {
    fn id(&self) -> NodeId {
        NodeId::MemoryRetrieval
    }

    async fn run(&self, state: &ConversationState, ctx: &RequestContext) -> Command {
        let next = Command::goto(NodeId::Supervisor);
        if !self.store.enabled() {
            return next;
        }
        if ctx.is_expired() {
            tracing::warn!(subject = %state.subject_id, "Deadline passed, skipping memory retrieval");
            return next;
        }

        let started = Instant::now();
        tracing::info!(subject = %state.subject_id, tenant = %state.tenant_id, "Memory retrieval node");
        match self.retrieve(state).await {
            Ok(context) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.metrics.record(NodeId::MemoryRetrieval.as_str(), elapsed_ms, true);
                tracing::info!(
                    subject = %state.subject_id,
                    memories = context.total_memories(),
                    rejected = context.rejected,
                    elapsed_ms,
                    "Memory retrieved"
                );
                next.with_patch(StatePatch::new().memory_context(context.to_prompt_block()))
            }
            Err(e) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.metrics.record(NodeId::MemoryRetrieval.as_str(), elapsed_ms, false);
                tracing::error!(subject = %state.subject_id, "Memory retrieval failed: {}", e);
                next
            }
        }
    }
}

/// 出口节点：从完成的对话中抽取记忆
pub struct MemoryExtractionNode {
    store: Arc<dyn MemoryStore>,
    auto_extract: bool,
    metrics: Arc<dyn MetricsSink>,
}

impl MemoryExtractionNode {
    pub fn new(store: Arc<dyn MemoryStore>, auto_extract: bool, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            store,
            auto_extract,
            metrics,
        }
    }
}

/// 用户与助手消息，跳过注入的身份说明
fn conversation_for_extraction(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter(|m| !m.content.is_empty() && !m.content.starts_with(IDENTIFICATION_PREFIX))
        .cloned()
        .collect()
}

#[async_trait]
impl Node for MemoryExtractionNode {
    fn id(&self) -> NodeId {
        NodeId::MemoryExtraction
    }

    async fn run(&self, state: &ConversationState, _ctx: &RequestContext) -> Command {
        let done = Command::goto(NodeId::Done);
        if !self.store.enabled() || !self.auto_extract {
            return done;
        }

        let conversation = conversation_for_extraction(&state.messages);
        if conversation.is_empty() {
            return done;
        }

        let started = Instant::now();
        tracing::info!(subject = %state.subject_id, tenant = %state.tenant_id, "Memory extraction");
        let result = self
            .store
            .extract(&state.subject_id, &conversation, &state.tenant_id)
            .await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .record(NodeId::MemoryExtraction.as_str(), elapsed_ms, result.is_ok());
        match result {
            Ok(()) => tracing::info!(
                subject = %state.subject_id,
                messages = conversation.len(),
                elapsed_ms,
                "Memory extraction complete"
            ),
            Err(e) => tracing::error!(subject = %state.subject_id, "Memory extraction failed: {}", e),
        }
        done
    }
}
