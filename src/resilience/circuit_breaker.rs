//! 熔断器：按依赖名隔离失败
//!
//! 三态：Closed（正常，累计连续失败）→ Open（快速拒绝，等待恢复窗口）→ HalfOpen（有限探测）。
//! 状态检查、准入决定与计数更新在同一把锁内完成；被保护的调用在锁外执行，慢调用不阻塞其他调用方的准入/拒绝。
//! 失败时记录并原样返回底层错误。

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::observability::{AuditEvent, AuditSink, Severity, TracingAuditLog};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 熔断阈值配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Closed 下连续失败达到该值即打开
    pub failure_threshold: u32,
    /// Open 持续该时长后（自最后一次失败起）转为 HalfOpen
    pub recovery_timeout: Duration,
    /// HalfOpen 下同时在途的探测上限，也是闭合所需的连续成功数
    pub half_open_max_calls: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 2,
        }
    }
}

/// 准入被拒绝；retry_after 为估计的剩余恢复时间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerOpenError {
    pub name: String,
    pub state: CircuitState,
    pub retry_after: Duration,
}

impl fmt::Display for BreakerOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            CircuitState::HalfOpen => {
                write!(f, "Circuit breaker '{}' HALF_OPEN limit reached.", self.name)
            }
            _ => write!(
                f,
                "Circuit breaker '{}' is OPEN. Recovery in {:.0}s.",
                self.name,
                self.retry_after.as_secs_f64()
            ),
        }
    }
}

impl std::error::Error for BreakerOpenError {}

/// 经熔断器调用的结果错误：要么被拒绝，要么是底层原始错误
#[derive(Debug)]
pub enum BreakerError<E> {
    Open(BreakerOpenError),
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open(e) => e.fmt(f),
            BreakerError::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Open(e) => Some(e),
            BreakerError::Inner(e) => Some(e),
        }
    }
}

/// 对外状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// 仅 Open 时非零
    pub time_until_recovery: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_in_flight: u32,
    last_failure: Option<Instant>,
    /// 每次状态迁移自增；旧状态下放行的调用结果不计入探测
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Permit {
    probe: bool,
    generation: u64,
}

/// 单个依赖的熔断器
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_in_flight: 0,
                last_failure: None,
                generation: 0,
            }),
            audit: Arc::new(TracingAuditLog),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    /// 当前状态（会先做惰性的 Open → HalfOpen 判断）
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.check_state_transition(&mut inner);
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn status(&self) -> BreakerStatus {
        let mut inner = self.lock();
        self.check_state_transition(&mut inner);
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.settings.failure_threshold,
            recovery_timeout: self.settings.recovery_timeout,
            time_until_recovery: self.time_until_recovery(&inner),
        }
    }

    /// 手动复位：强制 Closed 并清空计数
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition_to(&mut inner, CircuitState::Closed);
    }

    /// 经熔断器执行 op；Open 或 HalfOpen 探测已满时立即拒绝且不调用 op
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let permit = self.admit().map_err(BreakerError::Open)?;
        let mut guard = InFlight {
            breaker: self,
            permit,
            settled: false,
        };

        let result = op().await;
        guard.settled = true;
        match result {
            Ok(value) => {
                self.on_success(permit);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(permit, &e.to_string());
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn admit(&self) -> Result<Permit, BreakerOpenError> {
        let mut inner = self.lock();
        self.check_state_transition(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(Permit {
                probe: false,
                generation: inner.generation,
            }),
            CircuitState::Open => {
                let err = BreakerOpenError {
                    name: self.name.clone(),
                    state: CircuitState::Open,
                    retry_after: self.time_until_recovery(&inner),
                };
                self.audit.record(
                    AuditEvent::new("circuit_breaker_rejected", "resilience")
                        .severity(Severity::Warning)
                        .details(serde_json::json!({
                            "breaker": self.name,
                            "state": inner.state.as_str(),
                        })),
                );
                Err(err)
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.settings.half_open_max_calls {
                    return Err(BreakerOpenError {
                        name: self.name.clone(),
                        state: CircuitState::HalfOpen,
                        retry_after: Duration::ZERO,
                    });
                }
                inner.half_open_in_flight += 1;
                Ok(Permit {
                    probe: true,
                    generation: inner.generation,
                })
            }
        }
    }

    fn release(inner: &mut BreakerInner, permit: Permit) {
        if permit.probe && permit.generation == inner.generation {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn on_success(&self, permit: Permit) {
        let mut inner = self.lock();
        Self::release(&mut inner, permit);

        match inner.state {
            CircuitState::HalfOpen if permit.probe && permit.generation == inner.generation => {
                inner.success_count += 1;
                if inner.success_count >= self.settings.half_open_max_calls {
                    self.transition_to(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            _ => {}
        }
    }

    fn on_cancel(&self, permit: Permit) {
        let mut inner = self.lock();
        Self::release(&mut inner, permit);
        tracing::debug!(breaker = %self.name, state = %inner.state, "Guarded call cancelled by caller");
    }

    fn on_failure(&self, permit: Permit, error: &str) {
        let mut inner = self.lock();
        Self::release(&mut inner, permit);
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => self.transition_to(&mut inner, CircuitState::Open),
            CircuitState::Closed if inner.failure_count >= self.settings.failure_threshold => {
                self.transition_to(&mut inner, CircuitState::Open)
            }
            _ => {}
        }

        tracing::warn!(
            breaker = %self.name,
            state = %inner.state,
            failure_count = inner.failure_count,
            "Guarded call failed: {}",
            error
        );
        self.audit.record(
            AuditEvent::new("circuit_breaker_failure", "resilience")
                .severity(Severity::Warning)
                .details(serde_json::json!({
                    "breaker": self.name,
                    "state": inner.state.as_str(),
                    "failure_count": inner.failure_count,
                    "error": error,
                })),
        );
    }

    fn check_state_transition(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .last_failure
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed >= self.settings.recovery_timeout {
            self.transition_to(inner, CircuitState::HalfOpen);
        }
    }

    fn transition_to(&self, inner: &mut BreakerInner, new_state: CircuitState) {
        let old_state = inner.state;
        inner.state = new_state;
        inner.generation += 1;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        if new_state == CircuitState::Closed {
            inner.failure_count = 0;
        }

        if new_state == CircuitState::Open {
            tracing::warn!(breaker = %self.name, from = %old_state, "Circuit breaker opened");
        } else {
            tracing::info!(breaker = %self.name, from = %old_state, to = %new_state, "Circuit breaker transition");
        }
        self.audit.record(
            AuditEvent::new("circuit_breaker_transition", "resilience").details(serde_json::json!({
                "breaker": self.name,
                "from_state": old_state.as_str(),
                "to_state": new_state.as_str(),
                "failure_count": inner.failure_count,
            })),
        );
    }

    fn time_until_recovery(&self, inner: &BreakerInner) -> Duration {
        if inner.state != CircuitState::Open {
            return Duration::ZERO;
        }
        let elapsed = inner
            .last_failure
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX);
        self.settings.recovery_timeout.saturating_sub(elapsed)
    }
}

/// 被保护的 future 在完成前被丢弃（调用方取消）时只归还探测名额，不计失败
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_cancel(self.permit);
        }
    }
}
