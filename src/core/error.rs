//! 节点内部错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：能力节点的工具循环根据 AgentError 决定把错误反馈给模型继续，还是终止并降级回复。

use thiserror::Error;

use crate::llm::LlmError;
use crate::resilience::BreakerOpenError;

/// 能力节点 / 监督节点运行过程中可能出现的错误（模型、解析、工具、熔断、截止时间）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 工具轮次耗尽仍未给出最终回复
    #[error("Tool rounds exhausted after {0} rounds")]
    ToolRoundsExhausted(usize),

    #[error("{0}")]
    BreakerOpen(#[from] BreakerOpenError),

    /// 请求截止时间已过，未发出调用
    #[error("Request deadline exceeded")]
    DeadlineExceeded,
}

impl AgentError {
    /// 熔断拒绝（降级文案与其它错误不同）
    pub fn is_breaker_open(&self) -> bool {
        matches!(self, AgentError::BreakerOpen(_))
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让 LLM 重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 把工具错误作为工具结果反馈给模型
    ReportToolError { tool: String, message: String },
    /// 终止当前节点，由节点转为降级回复
    Abort,
}
