//! 图节点：记忆检索、路由监督、能力节点（信息 / 预约）、记忆抽取
//!
//! 所有对完成服务的调用都经过 `llm_api` 熔断器，并受请求截止时间约束（见 [`guarded`]）。

pub mod capability;
pub mod memory_nodes;
pub mod prompts;
pub mod supervisor;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::core::AgentError;
use crate::llm::{LlmClient, LlmError};
use crate::observability::{AuditSink, DecisionLog, MetricsCollector, MetricsSink, TracingAuditLog};
use crate::resilience::{BreakerError, BreakerRegistry, CircuitBreaker, LLM_DEPENDENCY};
use crate::workflow::{ConversationState, RequestContext};

pub use capability::{CapabilityKind, CapabilityNode, CapabilityProfile, DEFAULT_MAX_TOOL_ROUNDS};
pub use memory_nodes::{MemoryExtractionNode, MemoryRetrievalNode};
pub use supervisor::SupervisorNode;

/// 节点共享的协作者：完成服务、熔断器注册表、审计与指标
#[derive(Clone)]
pub struct NodeServices {
    pub llm: Arc<dyn LlmClient>,
    pub breakers: Arc<BreakerRegistry>,
    pub audit: Arc<dyn AuditSink>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl NodeServices {
    pub fn new(llm: Arc<dyn LlmClient>, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            llm,
            breakers,
            audit: Arc::new(TracingAuditLog),
            metrics: Arc::new(MetricsCollector::default()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn decisions(&self) -> DecisionLog {
        DecisionLog::new(self.audit.clone())
    }

    pub fn llm_breaker(&self) -> Arc<CircuitBreaker> {
        self.breakers.get(LLM_DEPENDENCY)
    }

    /// 记录一次节点执行：指标 + 审计
    pub fn record_execution(
        &self,
        node: &str,
        started: Instant,
        error: Option<&str>,
        state: &ConversationState,
    ) {
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let success = error.is_none();
        self.metrics.record(node, duration_ms, success);
        self.decisions().agent_execution(
            node,
            duration_ms,
            success,
            error,
            (&state.subject_id, &state.tenant_id),
        );
    }
}

/// 在请求截止时间内经熔断器执行 op
///
/// 截止时间已过时不发出调用、熔断器不计数；调用超时计为熔断器失败。
pub async fn guarded<T, F, Fut>(
    breaker: &CircuitBreaker,
    ctx: &RequestContext,
    op: F,
) -> Result<T, AgentError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let remaining = ctx.remaining();
    if remaining.is_some_and(|r| r.is_zero()) {
        return Err(AgentError::DeadlineExceeded);
    }

    let result = breaker
        .call(move || async move {
            match remaining {
                Some(limit) => tokio::time::timeout(limit, op())
                    .await
                    .unwrap_or_else(|_| Err(AgentError::Llm(LlmError::Timeout))),
                None => op().await,
            }
        })
        .await;

    result.map_err(|e| match e {
        BreakerError::Open(open) => AgentError::BreakerOpen(open),
        BreakerError::Inner(inner) => inner,
    })
}
