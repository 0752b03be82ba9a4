//! 患者记忆工具：让能力节点在工具循环中主动检索/写入长期记忆

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::memory::{MemoryCategory, MemoryContext, MemoryStore};
use crate::tools::{Tool, ToolContext};

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

pub struct RecallMemoriesTool {
    store: Arc<dyn MemoryStore>,
}

impl RecallMemoriesTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for RecallMemoriesTool {
    fn name(&self) -> &str {
        "recall_patient_memories"
    }

    fn description(&self) -> &str {
        "Search what is known about the current patient from previous conversations."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for"}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        if !self.store.enabled() {
            return Ok("Long-term memory is disabled.".to_string());
        }
        let query = str_arg(&args, "query").unwrap_or("");
        let records = self
            .store
            .recall(&ctx.subject_id, query, &ctx.tenant_id)
            .await
            .map_err(|e| e.to_string())?;
        let context = MemoryContext::from_records(ctx.subject_id.clone(), &records);
        if !context.has_memories() {
            return Ok("No memories found for this patient.".to_string());
        }
        Ok(context.to_prompt_block())
    }
}

pub struct StoreMemoryTool {
    store: Arc<dyn MemoryStore>,
}

impl StoreMemoryTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for StoreMemoryTool {
    fn name(&self) -> &str {
        "store_patient_memory"
    }

    fn description(&self) -> &str {
        "Remember a fact about the current patient. Categories: preference, medical_context, \
         appointment_history, communication, insurance, general."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "memory_text": {"type": "string"},
                "category": {"type": "string"}
            },
            "required": ["memory_text"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        if !self.store.enabled() {
            return Ok("Long-term memory is disabled.".to_string());
        }
        let text = str_arg(&args, "memory_text").ok_or("missing required argument `memory_text`")?;
        let category = match str_arg(&args, "category") {
            Some(raw) => raw.parse::<MemoryCategory>().map_err(|e| e.to_string())?,
            None => MemoryCategory::General,
        };
        self.store
            .store(&ctx.subject_id, text, category, &ctx.tenant_id)
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("Stored {category} memory."))
    }
}

pub struct AppointmentHistoryTool {
    store: Arc<dyn MemoryStore>,
}

impl AppointmentHistoryTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for AppointmentHistoryTool {
    fn name(&self) -> &str {
        "get_patient_appointment_history"
    }

    fn description(&self) -> &str {
        "List the appointment history remembered for the current patient."
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<String, String> {
        if !self.store.enabled() {
            return Ok("Long-term memory is disabled.".to_string());
        }
        let records = self
            .store
            .recall(&ctx.subject_id, "", &ctx.tenant_id)
            .await
            .map_err(|e| e.to_string())?;
        let context = MemoryContext::from_records(ctx.subject_id.clone(), &records);
        let history: Vec<String> = context
            .in_category(MemoryCategory::AppointmentHistory)
            .map(|t| format!("- {t}"))
            .collect();
        if history.is_empty() {
            return Ok("No appointment history on record.".to_string());
        }
        Ok(format!("Appointment history:\n{}", history.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryMemoryStore, NoopMemoryStore};

    fn ctx() -> ToolContext {
        ToolContext {
            subject_id: "1000000".into(),
            tenant_id: "default".into(),
        }
    }

    #[tokio::test]
    async fn test_store_then_history() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new(15));
        StoreMemoryTool::new(store.clone())
            .execute(
                serde_json::json!({"memory_text": "Cleaning with Dr. Anderson on 2026-08-05", "category": "appointment_history"}),
                &ctx(),
            )
            .await
            .unwrap();

        let out = AppointmentHistoryTool::new(store)
            .execute(serde_json::json!({}), &ctx())
            .await
            .unwrap();
        assert!(out.contains("Dr. Anderson"));
    }

    #[tokio::test]
    async fn test_unknown_category_rejected() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new(15));
        let err = StoreMemoryTool::new(store)
            .execute(
                serde_json::json!({"memory_text": "x", "category": "billing"}),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(err.contains("billing"));
    }

    #[tokio::test]
    async fn test_disabled_store() {
        let out = RecallMemoriesTool::new(Arc::new(NoopMemoryStore))
            .execute(serde_json::json!({"query": "dentist"}), &ctx())
            .await
            .unwrap();
        assert!(out.contains("disabled"));
    }
}
