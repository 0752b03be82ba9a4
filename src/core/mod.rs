//! 核心层：错误与恢复、工作流组装

pub mod builder;
pub mod error;
pub mod recovery;

pub use builder::AgentBuilder;
pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
