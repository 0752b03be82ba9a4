//! 带重试的 LLM 客户端装饰器
//!
//! 用 RetryPolicy 包装任意 LlmClient，仅对 LlmError::is_retryable 的错误重试。
//! 不与熔断器叠加使用：主流程的节点直接经熔断器调用内部客户端。

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::resilience::RetryPolicy;

pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.policy
            .run(
                || {
                    let request = request.clone();
                    async move { self.inner.complete(request).await }
                },
                LlmError::is_retryable,
            )
            .await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::Message;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors() {
        let scripted = Arc::new(ScriptedLlmClient::with_replies([
            Err(LlmError::Timeout),
            Err(LlmError::RateLimited { retry_after_ms: 10 }),
            Ok("ok".to_string()),
        ]));
        let client = RetryingLlmClient::new(scripted.clone(), policy());
        let out = client
            .complete(CompletionRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(scripted.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_response_not_retried() {
        let scripted = Arc::new(ScriptedLlmClient::with_replies([Err(
            LlmError::InvalidResponse("empty".into()),
        )]));
        let client = RetryingLlmClient::new(scripted.clone(), policy());
        let err = client
            .complete(CompletionRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::InvalidResponse("empty".into()));
        assert_eq!(scripted.call_count(), 1);
    }
}
