//! 弹性层：熔断器、熔断器注册表、指数退避重试

pub mod circuit_breaker;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    BreakerError, BreakerOpenError, BreakerSettings, BreakerStatus, CircuitBreaker, CircuitState,
};
pub use registry::{BreakerRegistry, LLM_DEPENDENCY};
pub use retry::RetryPolicy;
