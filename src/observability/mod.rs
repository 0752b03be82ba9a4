//! 可观测性：日志初始化、审计/决策透明日志、节点执行指标

pub mod audit;
pub mod metrics;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use audit::{
    AuditEvent, AuditSink, DecisionLog, FanoutAuditLog, MemoryAuditLog, RoutingRecord, Severity,
    TracingAuditLog,
};
pub use metrics::{ExecutionRecord, MetricSummary, MetricsCollector, MetricsSink};

/// 日志：默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
