//! Name -> schema -> executor lookup the Turn Router dispatches tool calls
//! through (spec §4.6 step 5). Unknown names are a `ToolError::UnknownTool`,
//! which the Turn Router surfaces as a `StateError` (spec §7) without
//! recursing into a follow-up LLM call.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use voice_agent_core::llm_types::ToolDefinition;

use crate::error::ToolError;

/// One callable tool: its schema (for the LLM request) plus an async
/// executor over JSON arguments, returning a JSON result.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Registry of tools available to a turn, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name.clone(), tool);
    }

    /// Builds the registry with the mock domain tools (spec §1: out of
    /// scope, treated as external collaborators with named interfaces).
    pub fn with_mock_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::mock_tools::ScheduleAppointment));
        registry.register(Arc::new(crate::mock_tools::RefillPrescription));
        registry.register(Arc::new(crate::mock_tools::EscalateEmergency));
        registry.register(Arc::new(crate::mock_tools::LookupMedicationInfo));
        registry
    }

    /// Tool schemas passed as `tools` on every streaming chat request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Invoke `name` with JSON `arguments` (spec §4.6 step 5). Empty
    /// argument strings are treated as `{}` by the caller before reaching
    /// here.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.call(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::with_mock_tools();
        let err = registry.call("delete_universe", Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "delete_universe"));
    }

    #[test]
    fn definitions_list_every_registered_tool() {
        let registry = ToolRegistry::with_mock_tools();
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert!(names.contains(&"schedule_appointment".to_string()));
        assert!(names.contains(&"refill_prescription".to_string()));
        assert!(names.contains(&"escalate_emergency".to_string()));
    }
}
