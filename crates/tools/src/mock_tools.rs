//! Mock domain tools (spec §1: "the domain tool-call implementations
//! ... are mock records"). The handlers here just fabricate a plausible
//! confirmation record rather than touching a real scheduling/pharmacy
//! system.

use async_trait::async_trait;
use serde_json::{json, Value};

use voice_agent_core::llm_types::ToolDefinition;

use crate::error::ToolError;
use crate::registry::Tool;

fn require_str<'a>(args: &'a Value, tool: &str, field: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.to_string(),
            message: format!("missing required field `{field}`"),
        })
}

pub struct ScheduleAppointment;

#[async_trait]
impl Tool for ScheduleAppointment {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "schedule_appointment",
            "Schedule or modify a healthcare appointment based on patient preferences and availability.",
            json!({
                "type": "object",
                "properties": {
                    "patient_name": {"type": "string", "description": "Full name of the patient."},
                    "dob": {"type": "string", "description": "Date of birth (YYYY-MM-DD)."},
                    "appointment_type": {"type": "string", "description": "Type of appointment (consultation, follow-up, etc.)."},
                    "preferred_date": {"type": "string", "description": "Preferred appointment date (YYYY-MM-DD)."},
                    "preferred_time": {"type": "string", "description": "Preferred appointment time (e.g. '10:00 AM')."}
                },
                "required": ["patient_name", "dob", "appointment_type"],
                "additionalProperties": false
            }),
        )
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let patient_name = require_str(&arguments, "schedule_appointment", "patient_name")?;
        let appointment_type = require_str(&arguments, "schedule_appointment", "appointment_type")?;
        let date = arguments.get("preferred_date").and_then(|v| v.as_str()).unwrap_or("the next available date");
        let time = arguments.get("preferred_time").and_then(|v| v.as_str()).unwrap_or("the next available time");

        Ok(json!({
            "status": "confirmed",
            "patient_name": patient_name,
            "appointment_type": appointment_type,
            "date": date,
            "time": time,
            "confirmation_id": format!("APT-{:06}", mock_sequence(patient_name)),
        }))
    }
}

pub struct RefillPrescription;

#[async_trait]
impl Tool for RefillPrescription {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "refill_prescription",
            "Refill an existing prescription for a patient's medication.",
            json!({
                "type": "object",
                "properties": {
                    "patient_name": {"type": "string", "description": "Full name of the patient."},
                    "medication_name": {"type": "string", "description": "Name of the medication to refill."},
                    "pharmacy": {"type": "string", "description": "Preferred pharmacy name or location (optional)."}
                },
                "required": ["patient_name", "medication_name"],
                "additionalProperties": false
            }),
        )
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let patient_name = require_str(&arguments, "refill_prescription", "patient_name")?;
        let medication_name = require_str(&arguments, "refill_prescription", "medication_name")?;
        let pharmacy = arguments.get("pharmacy").and_then(|v| v.as_str()).unwrap_or("your default pharmacy");

        Ok(json!({
            "status": "refill_requested",
            "patient_name": patient_name,
            "medication_name": medication_name,
            "pharmacy": pharmacy,
            "ready_by": "tomorrow, 10:00 AM",
        }))
    }
}

/// Requires a `{reason: string}` dict (spec §9 Open Question resolution:
/// the mock tool's argument shape was inconsistent across source variants;
/// the core standardizes on a dict).
pub struct EscalateEmergency;

#[async_trait]
impl Tool for EscalateEmergency {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "escalate_emergency",
            "Immediately escalate an urgent healthcare concern to a human agent.",
            json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string", "description": "Reason for the escalation (e.g. chest pain, severe symptoms)."}
                },
                "required": ["reason"],
                "additionalProperties": false
            }),
        )
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let reason = require_str(&arguments, "escalate_emergency", "reason")?;
        Ok(json!({
            "status": "escalated",
            "reason": reason,
            "human_agent_eta_seconds": 30,
        }))
    }
}

pub struct LookupMedicationInfo;

#[async_trait]
impl Tool for LookupMedicationInfo {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "lookup_medication_info",
            "Retrieve basic usage, warnings, and side effects information about a medication.",
            json!({
                "type": "object",
                "properties": {
                    "medication_name": {"type": "string", "description": "Medication name to look up."}
                },
                "required": ["medication_name"],
                "additionalProperties": false
            }),
        )
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let medication_name = require_str(&arguments, "lookup_medication_info", "medication_name")?;
        Ok(json!({
            "medication_name": medication_name,
            "summary": format!("{medication_name} is typically taken as directed by a physician."),
            "common_side_effects": ["nausea", "drowsiness"],
        }))
    }
}

/// Deterministic, content-derived pseudo-id so the same input always
/// produces the same mock confirmation number across test runs.
fn mock_sequence(seed: &str) -> u32 {
    seed.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32)) % 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn schedule_appointment_returns_requested_date_and_time() {
        let result = ScheduleAppointment
            .call(json!({
                "patient_name": "Alice Brown",
                "dob": "1987-04-12",
                "appointment_type": "follow-up",
                "preferred_date": "2025-06-01",
                "preferred_time": "10:00 AM"
            }))
            .await
            .unwrap();
        assert_eq!(result["date"], "2025-06-01");
        assert_eq!(result["time"], "10:00 AM");
        assert_eq!(result["status"], "confirmed");
    }

    #[tokio::test]
    async fn schedule_appointment_missing_field_is_invalid_arguments() {
        let err = ScheduleAppointment.call(json!({"dob": "1987-04-12"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn escalate_emergency_requires_reason_string() {
        let err = EscalateEmergency.call(json!("chest pain")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let ok = EscalateEmergency.call(json!({"reason": "chest pain"})).await.unwrap();
        assert_eq!(ok["status"], "escalated");
    }
}
