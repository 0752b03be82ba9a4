//! 记忆上下文：把检索到的分类记忆整理成注入 system prompt 的文本块
//!
//! 分类固定为 MemoryCategory 枚举，按固定表解析；未知分类显式拒绝（记录日志并跳过），不再默认归入 general。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::memory::MemoryRecord;

/// 医疗场景的记忆分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// 预约时间、医生偏好
    Preference,
    /// 病症、过敏、正在进行的治疗
    MedicalContext,
    /// 过往预约、取消记录
    AppointmentHistory,
    /// 语言、语气、无障碍需求
    Communication,
    /// 保险信息
    Insurance,
    General,
}

/// 分类解析表：字符串 → 分类 → 段落标题
const CATEGORY_TABLE: [(&str, MemoryCategory, &str); 6] = [
    ("preference", MemoryCategory::Preference, "Scheduling & Doctor Preferences"),
    ("medical_context", MemoryCategory::MedicalContext, "Medical Context"),
    ("appointment_history", MemoryCategory::AppointmentHistory, "Appointment History Notes"),
    ("communication", MemoryCategory::Communication, "Communication Preferences"),
    ("insurance", MemoryCategory::Insurance, "Insurance Information"),
    ("general", MemoryCategory::General, "Other Notes"),
];

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 6] = [
        MemoryCategory::Preference,
        MemoryCategory::MedicalContext,
        MemoryCategory::AppointmentHistory,
        MemoryCategory::Communication,
        MemoryCategory::Insurance,
        MemoryCategory::General,
    ];

    pub fn as_str(&self) -> &'static str {
        CATEGORY_TABLE
            .iter()
            .find(|(_, c, _)| c == self)
            .map(|(s, _, _)| *s)
            .unwrap_or("general")
    }

    /// prompt 中的段落标题
    pub fn heading(&self) -> &'static str {
        CATEGORY_TABLE
            .iter()
            .find(|(_, c, _)| c == self)
            .map(|(_, _, h)| *h)
            .unwrap_or("Other Notes")
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知记忆分类
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown memory category `{0}`")]
pub struct UnknownCategory(pub String);

impl FromStr for MemoryCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        CATEGORY_TABLE
            .iter()
            .find(|(name, _, _)| *name == key)
            .map(|(_, c, _)| *c)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// 单个主体（患者）的分类记忆
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub subject_id: String,
    /// 按 MemoryCategory::ALL 顺序存放的条目
    entries: Vec<(MemoryCategory, String)>,
    /// 因分类未知被拒绝的条目数
    pub rejected: usize,
}

impl MemoryContext {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            entries: Vec::new(),
            rejected: 0,
        }
    }

    /// 由检索结果构建；分类无法解析的条目被拒绝
    pub fn from_records(subject_id: impl Into<String>, records: &[MemoryRecord]) -> Self {
        let mut ctx = Self::new(subject_id);
        for record in records {
            let text = record.text.trim();
            if text.is_empty() {
                continue;
            }
            match record.category.parse::<MemoryCategory>() {
                Ok(category) => ctx.push(category, text),
                Err(e) => {
                    tracing::warn!(subject = %ctx.subject_id, "Rejected memory record: {}", e);
                    ctx.rejected += 1;
                }
            }
        }
        ctx
    }

    pub fn push(&mut self, category: MemoryCategory, text: impl Into<String>) {
        self.entries.push((category, text.into()));
    }

    pub fn has_memories(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn total_memories(&self) -> usize {
        self.entries.len()
    }

    pub fn in_category(&self, category: MemoryCategory) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(c, _)| *c == category)
            .map(|(_, t)| t.as_str())
    }

    /// 渲染为 prompt 文本块；无记忆时返回空串
    pub fn to_prompt_block(&self) -> String {
        if !self.has_memories() {
            return String::new();
        }

        let mut lines = vec![
            format!("=== PATIENT MEMORY CONTEXT (User: {}) ===", self.subject_id),
            "The following is known about this patient from previous interactions. \
             Use this context to provide personalized, continuity-aware care."
                .to_string(),
        ];

        for category in MemoryCategory::ALL {
            let mut items = self.in_category(category).peekable();
            if items.peek().is_none() {
                continue;
            }
            lines.push(format!("\n## {}", category.heading()));
            lines.extend(items.map(|t| format!("  - {t}")));
        }

        lines.push("\n=== END PATIENT MEMORY CONTEXT ===".to_string());
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(category: &str, text: &str) -> MemoryRecord {
        MemoryRecord {
            category: category.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_parse_known_categories() {
        assert_eq!("preference".parse::<MemoryCategory>().unwrap(), MemoryCategory::Preference);
        assert_eq!(" Insurance ".parse::<MemoryCategory>().unwrap(), MemoryCategory::Insurance);
        assert!("billing".parse::<MemoryCategory>().is_err());
    }

    #[test]
    fn test_unknown_category_is_rejected_not_bucketed() {
        let ctx = MemoryContext::from_records(
            "1000000",
            &[record("preference", "Prefers mornings"), record("billing", "Owes $20")],
        );
        assert_eq!(ctx.total_memories(), 1);
        assert_eq!(ctx.rejected, 1);
        assert_eq!(ctx.in_category(MemoryCategory::General).count(), 0);
    }

    #[test]
    fn test_prompt_block_sections_in_fixed_order() {
        let ctx = MemoryContext::from_records(
            "42",
            &[
                record("general", "Likes short answers"),
                record("medical_context", "Allergic to penicillin"),
            ],
        );
        let block = ctx.to_prompt_block();
        assert!(block.starts_with("=== PATIENT MEMORY CONTEXT (User: 42) ==="));
        let medical = block.find("## Medical Context").unwrap();
        let other = block.find("## Other Notes").unwrap();
        assert!(medical < other);
        assert!(block.contains("  - Allergic to penicillin"));
        assert!(block.ends_with("=== END PATIENT MEMORY CONTEXT ==="));
    }

    #[test]
    fn test_empty_context_renders_nothing() {
        assert_eq!(MemoryContext::new("1").to_prompt_block(), "");
    }
}
