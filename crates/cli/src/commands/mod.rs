pub mod assign;
pub mod bootstrap;
pub mod config;
pub mod doctor;
pub mod migrate;
pub mod report;
pub mod resume;
pub mod review;
pub mod seed;
pub mod show;
pub mod submit;

use routedesk_core::errors::{ApplicationError, InterfaceError, PipelineError};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, Value::Null)
    }

    pub fn success_with_data(command: &str, message: impl Into<String>, data: impl Serialize) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: None,
            data: to_data(data),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            correlation_id: None,
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Maps a pipeline error through the interface layer. A task carried by a
    /// persistence failure is attached as `data` so the caller can see it.
    pub fn pipeline_failure(command: &str, error: PipelineError, correlation_id: &str) -> Self {
        let error_class = error.error_class();
        let detail = error.to_string();
        let task = match &error {
            PipelineError::Persistence { task, .. } => to_data(task.as_ref()),
            _ => None,
        };

        let interface = ApplicationError::from(error).into_interface(correlation_id);
        let exit_code = match interface {
            InterfaceError::BadRequest { .. } => 7,
            InterfaceError::ServiceUnavailable { .. } => 8,
            InterfaceError::Internal { .. } => 9,
        };

        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: format!("{} ({detail})", interface.user_message()),
            correlation_id: Some(correlation_id.to_string()),
            data: task,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn to_data(data: impl Serialize) -> Option<Value> {
    match serde_json::to_value(data) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(error) => Some(Value::String(format!("unserializable payload: {error}"))),
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

#[cfg(test)]
mod tests {
    use routedesk_core::domain::task::{RequestMetadata, Task};
    use routedesk_core::errors::PipelineError;
    use serde_json::Value;

    use super::CommandResult;

    #[test]
    fn success_omits_empty_data() {
        let result = CommandResult::success("migrate", "applied pending migrations");
        let payload: Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["status"], "ok");
        assert!(payload.get("data").is_none());
        assert!(payload["error_class"].is_null());
    }

    #[test]
    fn empty_input_is_a_bad_request() {
        let result = CommandResult::pipeline_failure("submit", PipelineError::EmptyInput, "req-9");
        assert_eq!(result.exit_code, 7);

        let payload: Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["error_class"], "empty_input");
        assert_eq!(payload["correlation_id"], "req-9");
    }

    #[test]
    fn persistence_failure_carries_the_task() {
        let task = Task::new("printer jammed", RequestMetadata::from_channel("cli"));
        let error = PipelineError::Persistence {
            task: Box::new(task.clone()),
            message: "disk full".to_string(),
        };

        let result = CommandResult::pipeline_failure("submit", error, "req-10");
        assert_eq!(result.exit_code, 8);

        let payload: Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["data"]["id"], task.id.0);
        assert!(payload["message"].as_str().unwrap_or_default().contains("disk full"));
    }
}
