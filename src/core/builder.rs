//! Agent 构建器：从 AppConfig 统一组装工作流引擎
//!
//! 熔断器注册表、审计端与指标收集器在这里构建一次，注入到所有节点（不使用全局单例）。

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::config::AppConfig;
use crate::llm::{CompletionRequest, LlmClient, LlmError, OpenAiClient, ScriptedLlmClient};
use crate::memory::{InMemoryMemoryStore, MemoryStore, NoopMemoryStore, Role};
use crate::nodes::{
    CapabilityNode, CapabilityProfile, MemoryExtractionNode, MemoryRetrievalNode, NodeServices,
    SupervisorNode,
};
use crate::observability::{AuditSink, MetricsCollector, TracingAuditLog};
use crate::resilience::BreakerRegistry;
use crate::tools::Schedule;
use crate::workflow::{WorkflowBuilder, WorkflowEngine, WorkflowError};

/// 演示排班中的医生与专科
const DEFAULT_DOCTORS: &[(&str, &str)] = &[
    ("kevin anderson", "dentist"),
    ("emily johnson", "dentist"),
    ("sarah wilson", "cardiologist"),
    ("michael green", "pediatrician"),
];
/// 演示排班覆盖的天数（从今天起）
const ROSTER_DAYS: i64 = 14;

/// Agent 构建器：统一配置和初始化工作流的各个组件
pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    memory: Option<Arc<dyn MemoryStore>>,
    schedule: Option<Schedule>,
    audit: Option<Arc<dyn AuditSink>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            memory: None,
            schedule: None,
            audit: None,
            metrics: None,
        }
    }

    /// 指定 LLM 客户端（覆盖 [llm].provider）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(store);
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 按 [llm].provider 构建 LLM 客户端
    pub fn build_llm(&self) -> Result<Arc<dyn LlmClient>, WorkflowError> {
        let llm = &self.config.llm;
        match llm.provider.as_str() {
            "openai" => {
                tracing::info!(model = %llm.model, "Using OpenAI-compatible backend");
                Ok(Arc::new(
                    OpenAiClient::new(llm.base_url.as_deref(), &llm.model, None)
                        .with_request_timeout(Duration::from_secs(llm.request_timeout_secs)),
                ))
            }
            "scripted" => {
                tracing::info!("Using scripted offline backend");
                Ok(Arc::new(ScriptedLlmClient::new().with_responder(demo_responder)))
            }
            other => Err(WorkflowError::InvalidConfiguration(format!(
                "unknown llm provider `{other}`"
            ))),
        }
    }

    /// 按 [memory] 构建长期记忆
    pub fn build_memory_store(&self) -> Arc<dyn MemoryStore> {
        if self.config.memory.enabled {
            Arc::new(InMemoryMemoryStore::new(self.config.memory.max_results))
        } else {
            Arc::new(NoopMemoryStore)
        }
    }

    /// 从今天起的演示排班
    pub fn default_schedule() -> Schedule {
        let today = chrono::Local::now().date_naive();
        let dates: Vec<String> = (0..ROSTER_DAYS)
            .map(|d| (today + ChronoDuration::days(d)).format("%Y-%m-%d").to_string())
            .collect();
        let dates: Vec<&str> = dates.iter().map(String::as_str).collect();
        Schedule::with_roster(&dates, DEFAULT_DOCTORS)
    }

    /// 构建工作流引擎
    pub fn build(self) -> Result<WorkflowEngine, WorkflowError> {
        let llm = match &self.llm {
            Some(llm) => llm.clone(),
            None => self.build_llm()?,
        };
        let memory = self.memory.clone().unwrap_or_else(|| self.build_memory_store());
        let schedule = self.schedule.clone().unwrap_or_else(Self::default_schedule);
        let audit: Arc<dyn AuditSink> = self.audit.clone().unwrap_or_else(|| Arc::new(TracingAuditLog));
        let metrics = self.metrics.clone().unwrap_or_default();

        let cfg = &self.config;
        let breakers = Arc::new(
            BreakerRegistry::new(cfg.resilience.breaker_settings()).with_audit(audit.clone()),
        );
        let services = NodeServices::new(llm, breakers.clone())
            .with_audit(audit)
            .with_metrics(metrics.clone());

        let tool_timeout = cfg.tools.tool_timeout_secs;
        let rounds = cfg.workflow.max_tool_rounds;
        let information = CapabilityNode::new(
            CapabilityProfile::information(&schedule, &memory, tool_timeout),
            services.clone(),
        )
        .with_max_tool_rounds(rounds);
        let booking = CapabilityNode::new(
            CapabilityProfile::booking(&schedule, &memory, tool_timeout),
            services.clone(),
        )
        .with_max_tool_rounds(rounds);

        WorkflowBuilder::new()
            .breakers(breakers)
            .metrics(metrics.clone())
            .step_limit(cfg.workflow.step_limit)
            .max_capability_passes(cfg.workflow.max_capability_passes)
            .request_timeout(cfg.workflow.request_timeout())
            .node(MemoryRetrievalNode::new(
                memory.clone(),
                cfg.resilience.retry_policy(),
                metrics.clone(),
            ))
            .node(SupervisorNode::new(services))
            .node(information)
            .node(booking)
            .node(MemoryExtractionNode::new(memory, cfg.memory.auto_extract, metrics))
            .build()
    }
}

/// 离线演示：监督节点按关键词路由，能力节点回复一次后结束
fn demo_responder(request: &CompletionRequest) -> Result<String, LlmError> {
    let last = request
        .messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::User | Role::Assistant))
        .ok_or_else(|| LlmError::InvalidResponse("empty conversation".into()))?;

    if request.response_schema.is_none() {
        return Ok(format!("(offline) I received your request: {}", last.content));
    }

    if last.role == Role::Assistant {
        return Ok(r#"{"next": "terminate", "reasoning": "The worker has answered the patient."}"#.into());
    }
    let text = last.content.to_lowercase();
    let next = if ["book", "cancel", "reschedule", "appointment"]
        .iter()
        .any(|k| text.contains(k))
    {
        "booking"
    } else {
        "information"
    };
    Ok(format!(
        r#"{{"next": "{next}", "reasoning": "Keyword match for {next}."}}"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Route, RunRequest};

    fn scripted_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "scripted".into();
        cfg
    }

    #[tokio::test]
    async fn test_scripted_provider_runs_end_to_end() {
        let engine = AgentBuilder::new(scripted_config()).build().unwrap();
        let outcome = engine
            .run(RunRequest::new("1000000", "book a dentist appointment"))
            .await
            .unwrap();
        assert_eq!(outcome.last_route, Some(Route::Booking));
        assert!(outcome.final_message.starts_with("(offline)"));
        assert_eq!(outcome.state.route, Some(Route::Terminate));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "carrier-pigeon".into();
        assert!(matches!(
            AgentBuilder::new(cfg).build(),
            Err(WorkflowError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_default_schedule_covers_roster() {
        let slots = AgentBuilder::default_schedule().slots();
        assert_eq!(slots.len(), ROSTER_DAYS as usize * DEFAULT_DOCTORS.len() * 8);
    }
}
