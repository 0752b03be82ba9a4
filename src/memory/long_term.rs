//! 长期记忆：按租户与主体隔离的跨请求记忆
//!
//! 引擎只依赖 MemoryStore trait（recall / extract / store）；当前实现为 InMemoryMemoryStore（关键词重叠），
//! 后续可接向量库。所有调用方都把错误降级为空上下文，不会中断请求。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::{MemoryCategory, Message, Role};

/// 检索结果中的一条记忆；category 为存储端的原始分类字符串
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRecord {
    pub category: String,
    pub text: String,
}

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("memory backend unavailable: {0}")]
    Unavailable(String),
    #[error("memory operation failed: {0}")]
    Operation(String),
}

/// 长期记忆 trait
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// 按查询检索主体的记忆；query 为空时返回全部
    async fn recall(
        &self,
        subject_id: &str,
        query: &str,
        tenant_id: &str,
    ) -> Result<Vec<MemoryRecord>, MemoryError>;

    /// 从一段对话中抽取并保存记忆
    async fn extract(
        &self,
        subject_id: &str,
        conversation: &[Message],
        tenant_id: &str,
    ) -> Result<(), MemoryError>;

    /// 直接写入一条分类记忆（供记忆工具使用）
    async fn store(
        &self,
        subject_id: &str,
        text: &str,
        category: MemoryCategory,
        tenant_id: &str,
    ) -> Result<(), MemoryError>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未启用长期记忆时使用
#[derive(Clone, Default)]
pub struct NoopMemoryStore;

#[async_trait]
impl MemoryStore for NoopMemoryStore {
    async fn recall(&self, _: &str, _: &str, _: &str) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(Vec::new())
    }

    async fn extract(&self, _: &str, _: &[Message], _: &str) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn store(&self, _: &str, _: &str, _: MemoryCategory, _: &str) -> Result<(), MemoryError> {
        Ok(())
    }

    fn enabled(&self) -> bool {
        false
    }
}

struct StoredMemory {
    category: MemoryCategory,
    text: String,
    tokens: HashSet<String>,
}

/// (tenant_id, subject_id)
type SubjectKey = (String, String);

/// 简单内存实现：按关键词重叠检索，租户与主体之间互不可见
#[derive(Clone)]
pub struct InMemoryMemoryStore {
    store: Arc<RwLock<HashMap<SubjectKey, Vec<StoredMemory>>>>,
    max_results: usize,
    max_entries_per_subject: usize,
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

impl InMemoryMemoryStore {
    pub fn new(max_results: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            max_results,
            max_entries_per_subject: 500,
        }
    }

    fn key(subject_id: &str, tenant_id: &str) -> SubjectKey {
        (tenant_id.to_string(), subject_id.to_string())
    }

    fn insert(&self, subject_id: &str, tenant_id: &str, category: MemoryCategory, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        let entries = store.entry(Self::key(subject_id, tenant_id)).or_default();
        if entries.iter().any(|m| m.text == text) {
            return;
        }
        entries.push(StoredMemory {
            category,
            text: text.to_string(),
            tokens: tokenize_lower(text),
        });
        let n = entries.len();
        if n > self.max_entries_per_subject {
            entries.drain(0..n - self.max_entries_per_subject);
        }
    }

    /// 主体记忆条数
    pub fn len(&self, subject_id: &str, tenant_id: &str) -> usize {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        store
            .get(&Self::key(subject_id, tenant_id))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new(15)
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn recall(
        &self,
        subject_id: &str,
        query: &str,
        tenant_id: &str,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = store.get(&Self::key(subject_id, tenant_id)) else {
            return Ok(Vec::new());
        };

        let to_record = |m: &StoredMemory| MemoryRecord {
            category: m.category.to_string(),
            text: m.text.clone(),
        };

        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() {
            return Ok(entries.iter().take(self.max_results).map(to_record).collect());
        }

        let mut scored: Vec<(usize, &StoredMemory)> = entries
            .iter()
            .map(|m| (query_tokens.intersection(&m.tokens).count(), m))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(self.max_results)
            .map(|(_, m)| to_record(m))
            .collect())
    }

    async fn extract(
        &self,
        subject_id: &str,
        conversation: &[Message],
        tenant_id: &str,
    ) -> Result<(), MemoryError> {
        for msg in conversation.iter().filter(|m| m.role == Role::User) {
            self.insert(subject_id, tenant_id, MemoryCategory::General, &msg.content);
        }
        Ok(())
    }

    async fn store(
        &self,
        subject_id: &str,
        text: &str,
        category: MemoryCategory,
        tenant_id: &str,
    ) -> Result<(), MemoryError> {
        self.insert(subject_id, tenant_id, category, text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recall_ranks_by_keyword_overlap() {
        let store = InMemoryMemoryStore::new(5);
        store
            .store("1", "Prefers morning dentist appointments", MemoryCategory::Preference, "t1")
            .await
            .unwrap();
        store
            .store("1", "Allergic to penicillin", MemoryCategory::MedicalContext, "t1")
            .await
            .unwrap();

        let hits = store.recall("1", "book a dentist appointment", "t1").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, "preference");
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let store = InMemoryMemoryStore::default();
        store
            .store("1", "Prefers Dr. Smith", MemoryCategory::Preference, "clinic-a")
            .await
            .unwrap();
        assert!(store.recall("1", "", "clinic-b").await.unwrap().is_empty());
        assert_eq!(store.recall("1", "", "clinic-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extract_keeps_user_turns_only() {
        let store = InMemoryMemoryStore::default();
        let conversation = vec![
            Message::user("I can only come on Fridays"),
            Message::assistant("Noted."),
        ];
        store.extract("7", &conversation, "default").await.unwrap();
        store.extract("7", &conversation, "default").await.unwrap();
        assert_eq!(store.len("7", "default"), 1);
    }
}
