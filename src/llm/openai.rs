//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。
//! 工具集与结构化输出 schema 以末尾 system 指令的形式附加，模型按 JSON 文本协议回复。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout: Duration::from_secs(60),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn to_openai_messages(
        &self,
        request: &CompletionRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut out = Vec::with_capacity(request.messages.len() + 1);
        for m in &request.messages {
            out.push(convert_message(m)?);
        }
        if let Some(directive) = render_directives(request) {
            out.push(convert_message(&Message::system(directive))?);
        }
        Ok(out)
    }
}

fn build_err(e: impl std::fmt::Display) -> LlmError {
    LlmError::ApiError(format!("request build failed: {e}"))
}

fn convert_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    Ok(match m.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(build_err)?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(build_err)?,
        ),
        Role::Assistant => ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(build_err)?,
        ),
        // 文本协议下工具结果以 user 消息回传
        Role::Tool => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!(
                    "Tool result ({}): {}",
                    m.name.as_deref().unwrap_or("tool"),
                    m.content
                ))
                .build()
                .map_err(build_err)?,
        ),
    })
}

/// 工具集与结构化输出要求 → 末尾 system 指令
pub fn render_directives(request: &CompletionRequest) -> Option<String> {
    let mut parts = Vec::new();
    if !request.tools.is_empty() {
        let tools = serde_json::to_string_pretty(&request.tools).unwrap_or_else(|_| "[]".into());
        parts.push(format!(
            "## Available tools\nTo call a tool, reply with ONLY one JSON object: \
             {{\"tool\": \"<name>\", \"args\": {{...}}}}. Otherwise reply in plain text.\n```json\n{tools}\n```"
        ));
    }
    if let Some(schema) = &request.response_schema {
        parts.push(format!(
            "## Response format\nReply with ONLY a JSON object matching this schema:\n```json\n{schema}\n```"
        ));
    }
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let api_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(&request)?)
            .build()
            .map_err(build_err)?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(api_request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::InvalidResponse("empty completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolSpec;

    #[test]
    fn test_no_directive_for_plain_request() {
        let req = CompletionRequest::new(vec![Message::user("hi")]);
        assert!(render_directives(&req).is_none());
    }

    #[test]
    fn test_directive_lists_tools_and_schema() {
        let req = CompletionRequest::new(vec![])
            .with_tools(vec![ToolSpec {
                name: "set_appointment".into(),
                description: "Book a slot".into(),
                parameters: serde_json::json!({"type": "object"}),
            }])
            .with_schema(serde_json::json!({"type": "object"}));
        let directive = render_directives(&req).unwrap();
        assert!(directive.contains("set_appointment"));
        assert!(directive.contains("## Response format"));
    }
}
