//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供能力节点的工具循环决定是重试、反馈工具错误还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// tool 为本轮调用的工具名（解析失败时为 None）
    pub fn handle(&self, err: &AgentError, tool: Option<&str>) -> RecoveryAction {
        let tool = tool.unwrap_or("unknown").to_string();
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output was not valid JSON: {raw}. \
                 To call a tool, output exactly one JSON object of the form \
                 {{\"tool\": \"<name>\", \"args\": {{...}}}} and nothing else. \
                 To answer the patient, reply in plain text."
            )),
            AgentError::HallucinatedTool(name) => RecoveryAction::ReportToolError {
                tool: name.clone(),
                message: format!("Tool '{name}' does not exist. Use one of the listed tools."),
            },
            AgentError::ToolTimeout(name) => RecoveryAction::ReportToolError {
                tool: name.clone(),
                message: format!("Tool '{name}' timed out."),
            },
            AgentError::ToolExecutionFailed(msg) => RecoveryAction::ReportToolError {
                tool,
                message: format!("Error: {msg}"),
            },
            AgentError::Llm(_)
            | AgentError::BreakerOpen(_)
            | AgentError::DeadlineExceeded
            | AgentError::ToolRoundsExhausted(_) => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_recovery_json_parse_error() {
        let engine = RecoveryEngine::new();
        let err = AgentError::JsonParseError("invalid json".to_string());
        match engine.handle(&err, None) {
            RecoveryAction::RetryWithPrompt(msg) => assert!(msg.contains("JSON")),
            other => panic!("Expected RetryWithPrompt, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_tool_failure_is_reported() {
        let engine = RecoveryEngine::new();
        let err = AgentError::ToolExecutionFailed("slot taken".to_string());
        assert_eq!(
            engine.handle(&err, Some("set_appointment")),
            RecoveryAction::ReportToolError {
                tool: "set_appointment".into(),
                message: "Error: slot taken".into(),
            }
        );
    }

    #[test]
    fn test_recovery_hallucinated_tool() {
        let engine = RecoveryEngine::new();
        let err = AgentError::HallucinatedTool("teleport".to_string());
        match engine.handle(&err, Some("teleport")) {
            RecoveryAction::ReportToolError { tool, message } => {
                assert_eq!(tool, "teleport");
                assert!(message.contains("does not exist"));
            }
            other => panic!("Expected ReportToolError, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_llm_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Llm(LlmError::Timeout);
        assert_eq!(engine.handle(&err, None), RecoveryAction::Abort);
        assert_eq!(
            engine.handle(&AgentError::ToolRoundsExhausted(15), None),
            RecoveryAction::Abort
        );
    }
}
