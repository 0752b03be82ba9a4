//! 工具层：注册表、执行器、模型输出中的工具调用解析，以及门诊排班与患者记忆工具

pub mod clinic;
pub mod executor;
pub mod memory_tools;
pub mod parse;
pub mod registry;

use std::sync::Arc;

use crate::memory::MemoryStore;

pub use clinic::{
    AvailabilityByDoctorTool, AvailabilityBySpecializationTool, CancelAppointmentTool,
    RescheduleAppointmentTool, Schedule, SetAppointmentTool, Slot,
};
pub use executor::ToolExecutor;
pub use memory_tools::{AppointmentHistoryTool, RecallMemoriesTool, StoreMemoryTool};
pub use parse::{extract_json, parse_model_turn, ModelTurn, ToolCall};
pub use registry::{Tool, ToolContext, ToolRegistry};

fn register_memory_tools(registry: &mut ToolRegistry, store: &Arc<dyn MemoryStore>) {
    registry.register(RecallMemoriesTool::new(store.clone()));
    registry.register(StoreMemoryTool::new(store.clone()));
}

/// 信息节点工具集：查询空闲时段 + 患者记忆
pub fn information_tools(schedule: &Schedule, store: &Arc<dyn MemoryStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(AvailabilityByDoctorTool::new(schedule.clone()));
    registry.register(AvailabilityBySpecializationTool::new(schedule.clone()));
    register_memory_tools(&mut registry, store);
    registry
}

/// 预约节点工具集：预约 / 取消 / 改约 + 患者记忆与预约历史
pub fn booking_tools(schedule: &Schedule, store: &Arc<dyn MemoryStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(SetAppointmentTool::new(schedule.clone()));
    registry.register(CancelAppointmentTool::new(schedule.clone()));
    registry.register(RescheduleAppointmentTool::new(schedule.clone()));
    register_memory_tools(&mut registry, store);
    registry.register(AppointmentHistoryTool::new(store.clone()));
    registry
}
