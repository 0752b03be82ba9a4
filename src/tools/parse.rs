//! 模型输出解析：Tool Call 或直接回复
//!
//! 从文本中提取 JSON（```json ... ``` 或裸 JSON）并解析为 ToolCall；tool 为空或无 JSON 时视为直接回复。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// LLM 返回的 Tool Call（简化 JSON：{"tool": "set_appointment", "args": {...}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    /// 直接回复用户
    Reply(String),
    /// 需要执行工具
    ToolCall(ToolCall),
}

/// 提取文本中的 JSON 片段
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    match trimmed.rfind('}') {
        Some(end) if end > start => Some(&trimmed[start..=end]),
        // 未闭合的 JSON 交给解析器报错
        _ if start == 0 => Some(trimmed),
        _ => None,
    }
}

pub fn parse_model_turn(output: &str) -> Result<ModelTurn, AgentError> {
    let trimmed = output.trim();
    let Some(json_str) = extract_json(trimmed) else {
        return Ok(ModelTurn::Reply(trimmed.to_string()));
    };

    // 含 JSON 但不是工具调用格式（如回复里引用了花括号）时按普通回复处理
    let value: serde_json::Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) if trimmed.starts_with('{') || trimmed.starts_with("```") => {
            return Err(AgentError::JsonParseError(format!("{e}: {json_str}")));
        }
        Err(_) => return Ok(ModelTurn::Reply(trimmed.to_string())),
    };
    if value.get("tool").is_none() {
        return Ok(ModelTurn::Reply(trimmed.to_string()));
    }

    let parsed: ToolCall = serde_json::from_value(value)
        .map_err(|e| AgentError::JsonParseError(format!("{e}: {json_str}")))?;
    if parsed.tool.is_empty() {
        Ok(ModelTurn::Reply(trimmed.to_string()))
    } else {
        Ok(ModelTurn::ToolCall(parsed))
    }
}
