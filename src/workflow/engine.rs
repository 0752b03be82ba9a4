//! 工作流引擎
//!
//! 按节点图逐个 await 节点，应用补丁并校验转移；步数超限时以 StepLimitExceeded 终止请求。
//! 熔断器注册表是唯一的跨请求共享状态，引擎对外提供其状态查询与重置。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::memory::{Message, Role};
use crate::observability::{MetricSummary, MetricsCollector};
use crate::resilience::{BreakerRegistry, BreakerStatus};
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::*;

/// 没有任何助手回复时返回给调用方的文案
pub const FALLBACK_MESSAGE: &str =
    "I'm sorry, I could not process your request right now. Please try again later.";

/// 工作流引擎
pub struct WorkflowEngine {
    graph: WorkflowGraph,
    breakers: Arc<BreakerRegistry>,
    metrics: Option<Arc<MetricsCollector>>,
    step_limit: usize,
    max_capability_passes: Option<usize>,
    request_timeout: Option<Duration>,
}

impl WorkflowEngine {
    pub(crate) fn new(
        graph: WorkflowGraph,
        breakers: Arc<BreakerRegistry>,
        metrics: Option<Arc<MetricsCollector>>,
        step_limit: usize,
        max_capability_passes: Option<usize>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            graph,
            breakers,
            metrics,
            step_limit,
            max_capability_passes,
            request_timeout,
        }
    }

    pub fn step_limit(&self) -> usize {
        self.step_limit
    }

    /// 执行一次请求
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, WorkflowError> {
        let ctx = RequestContext::new(request.deadline.or(self.request_timeout));
        let state = ConversationState::new(
            request.subject_id,
            request.tenant_id,
            vec![Message::user(request.message)],
        );
        self.run_state(state, &ctx).await
    }

    /// 从给定会话状态开始执行（已有历史的多轮对话）
    pub async fn run_state(
        &self,
        mut state: ConversationState,
        ctx: &RequestContext,
    ) -> Result<RunOutcome, WorkflowError> {
        let started = Instant::now();
        let initial_len = state.messages.len();
        let mut current = WorkflowGraph::ENTRY;
        let mut steps = 0usize;
        let mut passes: HashMap<NodeId, usize> = HashMap::new();
        let mut last_capability: Option<Route> = None;

        tracing::info!(
            run_id = %ctx.run_id,
            subject = %state.subject_id,
            tenant = %state.tenant_id,
            "Workflow run started"
        );

        while current != NodeId::Done {
            let node = self.graph.node(current)?;
            tracing::debug!(run_id = %ctx.run_id, node = %current, step = steps, "Entering node");

            let command = node.run(&state, ctx).await;
            let mut next = command.goto;
            self.graph.validate(current, next)?;

            match current {
                NodeId::Information => last_capability = Some(Route::Information),
                NodeId::Booking => last_capability = Some(Route::Booking),
                _ => {}
            }
            state.apply(command.patch);

            if next.is_capability() {
                if let Some(cap) = self.max_capability_passes {
                    let count = passes.entry(next).or_insert(0);
                    *count += 1;
                    if *count > cap {
                        tracing::warn!(
                            run_id = %ctx.run_id,
                            node = %next,
                            cap,
                            "Capability pass limit reached, finishing request"
                        );
                        state.apply(
                            StatePatch::new()
                                .route(Route::Terminate)
                                .reasoning(format!("Pass limit of {cap} reached for {next}")),
                        );
                        next = NodeId::MemoryExtraction;
                    }
                }
            }

            steps += 1;
            if steps > self.step_limit {
                tracing::error!(
                    run_id = %ctx.run_id,
                    subject = %state.subject_id,
                    steps,
                    limit = self.step_limit,
                    "Step limit exceeded, aborting request"
                );
                return Err(WorkflowError::StepLimitExceeded {
                    limit: self.step_limit,
                    steps,
                });
            }
            current = next;
        }

        let final_message = state.messages[initial_len..]
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());

        tracing::info!(
            run_id = %ctx.run_id,
            subject = %state.subject_id,
            steps,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Workflow run finished"
        );

        Ok(RunOutcome {
            final_message,
            last_route: last_capability.or(state.route),
            last_reasoning: state.reasoning.clone(),
            steps,
            state,
        })
    }

    pub fn breaker_status(&self, name: &str) -> BreakerStatus {
        self.breakers.status(name)
    }

    /// 强制 Closed 并清空计数
    pub fn reset_breaker(&self, name: &str) -> BreakerStatus {
        self.breakers.reset(name)
    }

    pub fn breaker_statuses(&self) -> Vec<BreakerStatus> {
        self.breakers.statuses()
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// 节点执行指标汇总（未挂接指标收集器时为空）
    pub fn metrics_summary(&self) -> std::collections::BTreeMap<String, MetricSummary> {
        self.metrics
            .as_ref()
            .map(|m| m.summary())
            .unwrap_or_default()
    }
}
