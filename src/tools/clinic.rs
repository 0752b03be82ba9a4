//! 门诊排班工具：查询医生/专科空闲时段、预约、取消、改约
//!
//! 排班表为进程内共享的 Schedule（Arc<RwLock>），时段格式 `YYYY-MM-DD HH:MM`，查询日期格式 `YYYY-MM-DD`。
//! 预约人默认取请求主体（ToolContext.subject_id）。

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext};

/// 单个时段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub date_slot: String,
    pub specialization: String,
    pub doctor_name: String,
    pub patient: Option<String>,
}

impl Slot {
    fn is_available(&self) -> bool {
        self.patient.is_none()
    }

    fn time(&self) -> &str {
        self.date_slot.split_whitespace().nth(1).unwrap_or("")
    }
}

/// 共享排班表
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    slots: Arc<RwLock<Vec<Slot>>>,
}

impl Schedule {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self {
            slots: Arc::new(RwLock::new(slots)),
        }
    }

    /// 演示用排班：若干医生在给定日期 08:00–11:30 每半小时一个时段
    pub fn with_roster(dates: &[&str], doctors: &[(&str, &str)]) -> Self {
        let mut slots = Vec::new();
        for date in dates {
            for (doctor, specialization) in doctors {
                for hour in 8..12 {
                    for minute in ["00", "30"] {
                        slots.push(Slot {
                            date_slot: format!("{date} {hour:02}:{minute}"),
                            specialization: specialization.to_string(),
                            doctor_name: doctor.to_string(),
                            patient: None,
                        });
                    }
                }
            }
        }
        Self::new(slots)
    }

    pub fn slots(&self) -> Vec<Slot> {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn available_on(&self, date: &str, matches: impl Fn(&Slot) -> bool) -> Vec<Slot> {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.date_slot.starts_with(date) && s.is_available() && matches(s))
            .cloned()
            .collect()
    }

    pub fn book(&self, date_slot: &str, doctor: &str, patient: &str) -> Result<(), String> {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let slot = slots
            .iter_mut()
            .find(|s| s.date_slot == date_slot && s.doctor_name.eq_ignore_ascii_case(doctor))
            .ok_or_else(|| format!("No slot {date_slot} for {doctor}"))?;
        if !slot.is_available() {
            return Err(format!("Slot {date_slot} with {doctor} is already booked"));
        }
        slot.patient = Some(patient.to_string());
        Ok(())
    }

    pub fn cancel(&self, date_slot: &str, doctor: &str, patient: &str) -> Result<(), String> {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let slot = slots
            .iter_mut()
            .find(|s| {
                s.date_slot == date_slot
                    && s.doctor_name.eq_ignore_ascii_case(doctor)
                    && s.patient.as_deref() == Some(patient)
            })
            .ok_or_else(|| format!("No appointment at {date_slot} with {doctor} for patient {patient}"))?;
        slot.patient = None;
        Ok(())
    }

    /// 患者的全部预约（时间顺序）
    pub fn appointments_of(&self, patient: &str) -> Vec<Slot> {
        let mut booked: Vec<Slot> = self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.patient.as_deref() == Some(patient))
            .cloned()
            .collect();
        booked.sort_by(|a, b| a.date_slot.cmp(&b.date_slot));
        booked
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing required argument `{key}`"))
}

/// 调用方显式传入的 id_number 优先，否则使用请求主体
fn patient_arg(args: &Value, ctx: &ToolContext) -> String {
    match args.get("id_number") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => ctx.subject_id.clone(),
    }
}

fn list_times(slots: &[Slot]) -> String {
    slots.iter().map(Slot::time).collect::<Vec<_>>().join(", ")
}

pub struct AvailabilityByDoctorTool {
    schedule: Schedule,
}

impl AvailabilityByDoctorTool {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl Tool for AvailabilityByDoctorTool {
    fn name(&self) -> &str {
        "check_availability_by_doctor"
    }

    fn description(&self) -> &str {
        "Check the free time slots of a specific doctor on a date (YYYY-MM-DD)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "desired_date": {"type": "string", "description": "YYYY-MM-DD"},
                "doctor_name": {"type": "string"}
            },
            "required": ["desired_date", "doctor_name"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
        let date = str_arg(&args, "desired_date")?;
        let doctor = str_arg(&args, "doctor_name")?;
        let free = self
            .schedule
            .available_on(date, |s| s.doctor_name.eq_ignore_ascii_case(doctor));
        if free.is_empty() {
            return Ok(format!("No availability for {doctor} on {date}."));
        }
        Ok(format!("Available slots for {doctor} on {date}: {}", list_times(&free)))
    }
}

pub struct AvailabilityBySpecializationTool {
    schedule: Schedule,
}

impl AvailabilityBySpecializationTool {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl Tool for AvailabilityBySpecializationTool {
    fn name(&self) -> &str {
        "check_availability_by_specialization"
    }

    fn description(&self) -> &str {
        "Check which doctors of a specialization are free on a date (YYYY-MM-DD)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "desired_date": {"type": "string", "description": "YYYY-MM-DD"},
                "specialization": {"type": "string"}
            },
            "required": ["desired_date", "specialization"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
        let date = str_arg(&args, "desired_date")?;
        let specialization = str_arg(&args, "specialization")?;
        let free = self
            .schedule
            .available_on(date, |s| s.specialization.eq_ignore_ascii_case(specialization));
        if free.is_empty() {
            return Ok(format!("No {specialization} availability on {date}."));
        }

        let doctors: BTreeSet<&str> = free.iter().map(|s| s.doctor_name.as_str()).collect();
        let lines: Vec<String> = doctors
            .into_iter()
            .map(|doctor| {
                let times: Vec<Slot> = free
                    .iter()
                    .filter(|s| s.doctor_name == doctor)
                    .cloned()
                    .collect();
                format!("{doctor}: {}", list_times(&times))
            })
            .collect();
        Ok(format!("{specialization} availability on {date}:\n{}", lines.join("\n")))
    }
}

pub struct SetAppointmentTool {
    schedule: Schedule,
}

impl SetAppointmentTool {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl Tool for SetAppointmentTool {
    fn name(&self) -> &str {
        "set_appointment"
    }

    fn description(&self) -> &str {
        "Book an appointment slot (YYYY-MM-DD HH:MM) with a doctor."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "desired_date": {"type": "string", "description": "YYYY-MM-DD HH:MM"},
                "doctor_name": {"type": "string"},
                "id_number": {"type": "string"}
            },
            "required": ["desired_date", "doctor_name"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let slot = str_arg(&args, "desired_date")?;
        let doctor = str_arg(&args, "doctor_name")?;
        let patient = patient_arg(&args, ctx);
        self.schedule.book(slot, doctor, &patient)?;
        Ok(format!("Successfully booked {slot} with {doctor}."))
    }
}

pub struct CancelAppointmentTool {
    schedule: Schedule,
}

impl CancelAppointmentTool {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl Tool for CancelAppointmentTool {
    fn name(&self) -> &str {
        "cancel_appointment"
    }

    fn description(&self) -> &str {
        "Cancel an existing appointment (YYYY-MM-DD HH:MM) with a doctor."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "date": {"type": "string", "description": "YYYY-MM-DD HH:MM"},
                "doctor_name": {"type": "string"},
                "id_number": {"type": "string"}
            },
            "required": ["date", "doctor_name"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let slot = str_arg(&args, "date")?;
        let doctor = str_arg(&args, "doctor_name")?;
        let patient = patient_arg(&args, ctx);
        self.schedule.cancel(slot, doctor, &patient)?;
        Ok(format!("Cancelled the appointment at {slot} with {doctor}."))
    }
}

pub struct RescheduleAppointmentTool {
    schedule: Schedule,
}

impl RescheduleAppointmentTool {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl Tool for RescheduleAppointmentTool {
    fn name(&self) -> &str {
        "reschedule_appointment"
    }

    fn description(&self) -> &str {
        "Move an existing appointment to a new slot with the same doctor."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "old_date": {"type": "string", "description": "YYYY-MM-DD HH:MM"},
                "new_date": {"type": "string", "description": "YYYY-MM-DD HH:MM"},
                "doctor_name": {"type": "string"},
                "id_number": {"type": "string"}
            },
            "required": ["old_date", "new_date", "doctor_name"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let old_slot = str_arg(&args, "old_date")?;
        let new_slot = str_arg(&args, "new_date")?;
        let doctor = str_arg(&args, "doctor_name")?;
        let patient = patient_arg(&args, ctx);

        self.schedule.book(new_slot, doctor, &patient)?;
        if let Err(e) = self.schedule.cancel(old_slot, doctor, &patient) {
            // 旧预约不存在时撤销新预约
            let _ = self.schedule.cancel(new_slot, doctor, &patient);
            return Err(e);
        }
        Ok(format!("Rescheduled from {old_slot} to {new_slot} with {doctor}."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Schedule {
        Schedule::with_roster(
            &["2026-08-05"],
            &[("kevin anderson", "dentist"), ("emily johnson", "dentist")],
        )
    }

    fn ctx() -> ToolContext {
        ToolContext {
            subject_id: "1000000".into(),
            tenant_id: "default".into(),
        }
    }

    #[tokio::test]
    async fn test_book_then_slot_disappears() {
        let schedule = schedule();
        let set = SetAppointmentTool::new(schedule.clone());
        let check = AvailabilityByDoctorTool::new(schedule.clone());

        set.execute(
            serde_json::json!({"desired_date": "2026-08-05 08:00", "doctor_name": "kevin anderson"}),
            &ctx(),
        )
        .await
        .unwrap();

        let out = check
            .execute(
                serde_json::json!({"desired_date": "2026-08-05", "doctor_name": "kevin anderson"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(!out.contains("08:00,"));
        assert!(out.contains("08:30"));
        assert_eq!(schedule.appointments_of("1000000").len(), 1);
    }

    #[tokio::test]
    async fn test_double_booking_is_rejected() {
        let schedule = schedule();
        schedule.book("2026-08-05 09:00", "emily johnson", "1").unwrap();
        let err = SetAppointmentTool::new(schedule)
            .execute(
                serde_json::json!({"desired_date": "2026-08-05 09:00", "doctor_name": "emily johnson"}),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(err.contains("already booked"));
    }

    #[tokio::test]
    async fn test_reschedule_rolls_back_when_old_slot_missing() {
        let schedule = schedule();
        let err = RescheduleAppointmentTool::new(schedule.clone())
            .execute(
                serde_json::json!({
                    "old_date": "2026-08-05 08:00",
                    "new_date": "2026-08-05 10:00",
                    "doctor_name": "kevin anderson"
                }),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(err.contains("No appointment"));
        assert!(schedule.appointments_of("1000000").is_empty());
    }

    #[tokio::test]
    async fn test_specialization_lists_each_doctor() {
        let out = AvailabilityBySpecializationTool::new(schedule())
            .execute(
                serde_json::json!({"desired_date": "2026-08-05", "specialization": "Dentist"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(out.contains("kevin anderson:"));
        assert!(out.contains("emily johnson:"));
    }

    #[tokio::test]
    async fn test_interleaved_slots_list_each_doctor_once() {
        let slot = |time: &str, doctor: &str| Slot {
            date_slot: format!("2026-08-05 {time}"),
            specialization: "dentist".into(),
            doctor_name: doctor.into(),
            patient: None,
        };
        let schedule = Schedule::new(vec![
            slot("08:00", "kevin anderson"),
            slot("08:00", "emily johnson"),
            slot("08:30", "kevin anderson"),
            slot("08:30", "emily johnson"),
        ]);
        let out = AvailabilityBySpecializationTool::new(schedule)
            .execute(
                serde_json::json!({"desired_date": "2026-08-05", "specialization": "dentist"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out.matches("kevin anderson:").count(), 1);
        assert_eq!(out.matches("emily johnson:").count(), 1);
    }

    #[tokio::test]
    async fn test_missing_argument() {
        let err = SetAppointmentTool::new(schedule())
            .execute(serde_json::json!({"doctor_name": "kevin anderson"}), &ctx())
            .await
            .unwrap_err();
        assert!(err.contains("desired_date"));
    }
}
