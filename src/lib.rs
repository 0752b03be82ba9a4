//! clinic-flow - 门诊对话编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 节点错误与恢复动作、AgentBuilder 组装
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Scripted / 重试装饰器）
//! - **memory**: 对话消息、分类记忆上下文、长期记忆存储
//! - **nodes**: 图节点（记忆检索、路由监督、信息 / 预约能力节点、记忆抽取）
//! - **observability**: 日志初始化、审计与决策透明日志、执行指标
//! - **resilience**: 熔断器、熔断器注册表、指数退避重试
//! - **tools**: 工具注册表与执行器、门诊排班与患者记忆工具
//! - **workflow**: 节点图、构建器与执行引擎

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod nodes;
pub mod observability;
pub mod resilience;
pub mod tools;
pub mod workflow;

pub use crate::core::AgentBuilder;
pub use crate::workflow::{RunOutcome, RunRequest, WorkflowEngine, WorkflowError};
