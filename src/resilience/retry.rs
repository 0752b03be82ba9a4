//! 指数退避重试
//!
//! 独立于熔断器的可复用工具：可重试错误在尚有次数时休眠
//! `min(base_delay * exponential_base^(attempt-1), max_delay)`（开启抖动时再乘以 [0.5, 1.0] 的均匀随机因子）后重试；
//! 最后一次失败原样返回原始错误，不可重试错误立即返回且不休眠。

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// 重试配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次（从 1 开始）失败后的基础等待时间，不含抖动
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }

    /// 执行 op，按 is_retryable 判断失败是否重试
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !is_retryable(&err) {
                tracing::debug!(attempt, "Non-retryable error: {}", err);
                return Err(err);
            }
            if attempt >= max_attempts {
                tracing::error!(max_attempts, "All retry attempts exhausted: {}", err);
                return Err(err);
            }

            let delay = self.backoff(attempt);
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Retrying after error: {}",
                err
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
