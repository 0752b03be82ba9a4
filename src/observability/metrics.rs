//! 节点执行指标
//!
//! MetricsSink::record(name, duration_ms, success) 即发即忘；MetricsCollector 为进程内实现，
//! 按名字聚合调用数、错误数、成功率与耗时分布，并保留最近的执行记录。
//! 调用数、错误数、平均与最大耗时为累计值；p95 基于每个名字最近 max_history 个样本。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

/// 指标写入端
pub trait MetricsSink: Send + Sync {
    fn record(&self, name: &str, duration_ms: f64, success: bool);
}

/// 单次执行记录
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub name: String,
    pub duration_ms: f64,
    pub success: bool,
    pub timestamp: i64,
}

/// 单个名字的聚合结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub total_calls: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Default)]
struct Series {
    calls: u64,
    errors: u64,
    total_duration_ms: f64,
    max_duration_ms: f64,
    window: VecDeque<f64>,
}

#[derive(Default)]
struct CollectorInner {
    series: HashMap<String, Series>,
    history: VecDeque<ExecutionRecord>,
}

/// 线程安全的进程内指标收集器
pub struct MetricsCollector {
    inner: Mutex<CollectorInner>,
    max_history: usize,
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: Mutex::new(CollectorInner::default()),
            max_history,
        }
    }

    /// 各名字的聚合（按名字排序）
    pub fn summary(&self) -> BTreeMap<String, MetricSummary> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .series
            .iter()
            .map(|(name, s)| {
                let total = s.calls;
                let avg = if total > 0 {
                    s.total_duration_ms / total as f64
                } else {
                    0.0
                };
                (
                    name.clone(),
                    MetricSummary {
                        total_calls: total,
                        error_count: s.errors,
                        success_rate: if total > 0 {
                            (total - s.errors) as f64 / total as f64
                        } else {
                            0.0
                        },
                        avg_duration_ms: avg,
                        p95_duration_ms: percentile(&s.window, 0.95),
                        max_duration_ms: s.max_duration_ms,
                    },
                )
            })
            .collect()
    }

    /// 最近 limit 条执行记录（旧 → 新）
    pub fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.series.clear();
        inner.history.clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MetricsSink for MetricsCollector {
    fn record(&self, name: &str, duration_ms: f64, success: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let series = inner.series.entry(name.to_string()).or_default();
        series.calls += 1;
        if !success {
            series.errors += 1;
        }
        series.total_duration_ms += duration_ms;
        series.max_duration_ms = series.max_duration_ms.max(duration_ms);
        series.window.push_back(duration_ms);
        while series.window.len() > self.max_history {
            series.window.pop_front();
        }

        inner.history.push_back(ExecutionRecord {
            name: name.to_string(),
            duration_ms,
            success,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
        while inner.history.len() > self.max_history {
            inner.history.pop_front();
        }
    }
}

fn percentile(data: &VecDeque<f64>, pct: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = data.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() as f64 * pct) as usize).min(sorted.len() - 1);
    sorted[idx]
}
