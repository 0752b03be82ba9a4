//! 审计与决策透明日志
//!
//! AuditSink 是只追加、即发即忘的接口：record 不返回错误，任何实现都不得把失败抛回调用方。
//! DecisionLog 在其上记录 Supervisor 的路由决策（可选路由、所选路由、理由、输入摘要）。

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

/// 事件级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// 单条审计事件
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: String,
    pub event_type: String,
    pub severity: Severity,
    pub source: String,
    pub tenant_id: String,
    pub subject_id: String,
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type: event_type.into(),
            severity: Severity::Info,
            source: source.into(),
            tenant_id: String::new(),
            subject_id: String::new(),
            details: serde_json::Value::Null,
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn subject(mut self, subject_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        self.subject_id = subject_id.into();
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// 审计写入端
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// 以结构化 tracing 行输出审计事件（target = "audit"）
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLog;

impl AuditSink for TracingAuditLog {
    fn record(&self, event: AuditEvent) {
        let line = serde_json::to_string(&event).unwrap_or_default();
        match event.severity {
            Severity::Info => tracing::info!(target: "audit", event = %event.event_type, audit = %line),
            Severity::Warning => tracing::warn!(target: "audit", event = %event.event_type, audit = %line),
            Severity::Error => tracing::error!(target: "audit", event = %event.event_type, audit = %line),
        }
    }
}

/// 进程内有界缓冲，便于检查与测试
#[derive(Debug)]
pub struct MemoryAuditLog {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl MemoryAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn events_of(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }
}

/// 同时写入多个审计端
pub struct FanoutAuditLog(pub Vec<std::sync::Arc<dyn AuditSink>>);

impl AuditSink for FanoutAuditLog {
    fn record(&self, event: AuditEvent) {
        if let Some((last, rest)) = self.0.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}

/// 一次路由决策的内容
#[derive(Debug, Clone)]
pub struct RoutingRecord<'a> {
    pub agent_name: &'a str,
    pub available_routes: &'a [&'a str],
    pub selected_route: &'a str,
    pub reasoning: &'a str,
    pub input_summary: &'a str,
    pub subject_id: &'a str,
    pub tenant_id: &'a str,
}

/// 决策透明日志
#[derive(Clone)]
pub struct DecisionLog {
    sink: std::sync::Arc<dyn AuditSink>,
}

impl DecisionLog {
    pub fn new(sink: std::sync::Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn routing_decision(&self, record: RoutingRecord<'_>) {
        self.sink.record(
            AuditEvent::new("routing_decision", record.agent_name)
                .subject(record.subject_id, record.tenant_id)
                .details(serde_json::json!({
                    "decision_type": "routing",
                    "available_routes": record.available_routes,
                    "selected_route": record.selected_route,
                    "reasoning": record.reasoning,
                    "input_summary": record.input_summary,
                })),
        );
    }

    /// 节点执行结果（成功/失败、耗时、可选错误）
    pub fn agent_execution(
        &self,
        agent_name: &str,
        duration_ms: f64,
        success: bool,
        error: Option<&str>,
        subject: (&str, &str),
    ) {
        let severity = if success { Severity::Info } else { Severity::Error };
        self.sink.record(
            AuditEvent::new("agent_execution", "agent")
                .severity(severity)
                .subject(subject.0, subject.1)
                .details(serde_json::json!({
                    "agent_name": agent_name,
                    "duration_ms": (duration_ms * 100.0).round() / 100.0,
                    "success": success,
                    "error": error,
                })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_log_is_bounded() {
        let log = MemoryAuditLog::new(2);
        for i in 0..3 {
            log.record(AuditEvent::new(format!("e{i}"), "test"));
        }
        let types: Vec<String> = log.events().into_iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec!["e1", "e2"]);
    }

    #[test]
    fn test_routing_decision_record() {
        let log = Arc::new(MemoryAuditLog::new(10));
        let decisions = DecisionLog::new(log.clone());
        decisions.routing_decision(RoutingRecord {
            agent_name: "supervisor",
            available_routes: &["information_node", "booking_node", "FINISH"],
            selected_route: "booking_node",
            reasoning: "user wants to book",
            input_summary: "book a dentist appointment",
            subject_id: "1000000",
            tenant_id: "default",
        });

        let events = log.events_of("routing_decision");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "supervisor");
        assert_eq!(events[0].details["selected_route"], "booking_node");
        assert_eq!(events[0].details["available_routes"][2], "FINISH");
    }

    #[test]
    fn test_fanout_delivers_to_every_sink() {
        let a = Arc::new(MemoryAuditLog::new(10));
        let b = Arc::new(MemoryAuditLog::new(10));
        let fanout = FanoutAuditLog(vec![a.clone(), b.clone()]);
        fanout.record(AuditEvent::new("ping", "test"));
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }
}
