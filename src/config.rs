//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CLINIC__*` 覆盖（双下划线表示嵌套，如 `CLINIC__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::resilience::{BreakerSettings, RetryPolicy};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub workflow: WorkflowSection,
    pub resilience: ResilienceSection,
    pub memory: MemorySection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 默认租户
    pub tenant_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "clinic-flow".to_string(),
            tenant_id: "default".to_string(),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / scripted
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            request_timeout_secs: 60,
        }
    }
}

/// [workflow] 段：步数上限、工具轮次、请求超时、能力节点轮次上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub step_limit: usize,
    pub max_tool_rounds: usize,
    /// 0 表示不设请求截止时间
    pub request_timeout_secs: u64,
    pub max_capability_passes: Option<usize>,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            step_limit: 20,
            max_tool_rounds: 15,
            request_timeout_secs: 120,
            max_capability_passes: None,
        }
    }
}

impl WorkflowSection {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

/// [resilience] 段：熔断器与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResilienceSection {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
    pub half_open_max_calls: u32,
    pub retry_max_attempts: u32,
    pub retry_base_delay_secs: f64,
    pub retry_max_delay_secs: f64,
    pub retry_exponential_base: f64,
    pub retry_jitter: bool,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60.0,
            half_open_max_calls: 2,
            retry_max_attempts: 3,
            retry_base_delay_secs: 1.0,
            retry_max_delay_secs: 30.0,
            retry_exponential_base: 2.0,
            retry_jitter: true,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}

impl ResilienceSection {
    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.failure_threshold.max(1),
            recovery_timeout: secs(self.recovery_timeout_secs),
            half_open_max_calls: self.half_open_max_calls.max(1),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: secs(self.retry_base_delay_secs),
            max_delay: secs(self.retry_max_delay_secs),
            exponential_base: self.retry_exponential_base,
            jitter: self.retry_jitter,
        }
    }
}

/// [memory] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub enabled: bool,
    /// 请求结束时自动抽取记忆
    pub auto_extract: bool,
    pub max_results: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_extract: true,
            max_results: 15,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CLINIC__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CLINIC__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CLINIC")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
