//! 记忆层：对话消息、分类记忆上下文、长期记忆存储

pub mod context;
pub mod conversation;
pub mod long_term;

pub use context::{MemoryCategory, MemoryContext, UnknownCategory};
pub use conversation::{Message, Role};
pub use long_term::{InMemoryMemoryStore, MemoryError, MemoryRecord, MemoryStore, NoopMemoryStore};
