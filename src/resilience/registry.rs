//! 熔断器注册表：依赖名 → 唯一熔断器实例
//!
//! 进程启动时构建一次，以 Arc 注入各节点；首次访问某依赖名时惰性创建，之后整个进程生命周期复用。
//! 注册表自身的锁只保护名字到实例的映射，与各熔断器内部状态锁相互独立。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::observability::{AuditEvent, AuditSink, Severity, TracingAuditLog};
use crate::resilience::{BreakerSettings, BreakerStatus, CircuitBreaker, CircuitState};

/// 节点调用补全服务所用的依赖名
pub const LLM_DEPENDENCY: &str = "llm_api";

pub struct BreakerRegistry {
    defaults: BreakerSettings,
    overrides: HashMap<String, BreakerSettings>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    audit: Arc<dyn AuditSink>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerSettings) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: Mutex::new(HashMap::new()),
            audit: Arc::new(TracingAuditLog),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// 为指定依赖使用单独的阈值（须在首次 get 之前设置）
    pub fn with_settings_for(mut self, name: impl Into<String>, settings: BreakerSettings) -> Self {
        self.overrides.insert(name.into(), settings);
        self
    }

    /// 获取（必要时创建）依赖对应的熔断器
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = breakers.get(name) {
            return Arc::clone(existing);
        }

        let settings = self.overrides.get(name).copied().unwrap_or(self.defaults);
        tracing::debug!(breaker = name, ?settings, "Creating circuit breaker");
        let breaker = Arc::new(
            CircuitBreaker::new(name, settings).with_audit(Arc::clone(&self.audit)),
        );
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// 只读查询：不存在的依赖返回默认 Closed 状态，不会注册新熔断器
    pub fn status(&self, name: &str) -> BreakerStatus {
        match self.lookup(name) {
            Some(breaker) => breaker.status(),
            None => self.idle_status(name),
        }
    }

    /// 手动复位并记录审计事件；从未使用过的依赖无需复位
    pub fn reset(&self, name: &str) -> BreakerStatus {
        let Some(breaker) = self.lookup(name) else {
            return self.idle_status(name);
        };
        breaker.reset();
        self.audit.record(
            AuditEvent::new("circuit_breaker_manual_reset", "resilience")
                .severity(Severity::Warning)
                .details(serde_json::json!({ "breaker": name })),
        );
        breaker.status()
    }

    /// 已创建的全部熔断器状态（按名字排序）
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        let mut statuses: Vec<BreakerStatus> = breakers.iter().map(|b| b.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

impl BreakerRegistry {
    fn lookup(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    fn idle_status(&self, name: &str) -> BreakerStatus {
        let settings = self.overrides.get(name).copied().unwrap_or(self.defaults);
        BreakerStatus {
            name: name.to_string(),
            state: CircuitState::Closed,
            failure_count: 0,
            failure_threshold: settings.failure_threshold,
            recovery_timeout: settings.recovery_timeout,
            time_until_recovery: Duration::ZERO,
        }
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}
