//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Scripted / 重试装饰器）

pub mod mock;
pub mod openai;
pub mod retrying;
pub mod traits;

pub use mock::ScriptedLlmClient;
pub use openai::{render_directives, OpenAiClient, TokenUsage};
pub use retrying::RetryingLlmClient;
pub use traits::{CompletionRequest, LlmClient, LlmError, ToolSpec};
