use routedesk_core::config::LoadOptions;
use routedesk_core::domain::task::{RequestMetadata, TaskStatus};
use routedesk_core::pipeline::{CancellationFlag, CORRELATION_ATTRIBUTE};

use crate::commands::bootstrap::run_with_app;
use crate::commands::CommandResult;

#[derive(Clone, Debug, Default)]
pub struct SubmitRequest {
    pub text: String,
    pub channel: String,
    /// `key=value` pairs copied into the request metadata.
    pub attributes: Vec<String>,
    pub correlation_id: Option<String>,
}

pub fn run(options: &LoadOptions, request: SubmitRequest) -> CommandResult {
    let metadata = match build_metadata(&request) {
        Ok(metadata) => metadata,
        Err(message) => return CommandResult::failure("submit", "invalid_argument", message, 7),
    };
    let correlation_id = metadata
        .attributes
        .get(CORRELATION_ATTRIBUTE)
        .cloned()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let metadata = metadata.with_attribute(CORRELATION_ATTRIBUTE, correlation_id.clone());

    run_with_app("submit", options, |app| async move {
        let cancel = CancellationFlag::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!(
                        event_name = "cli.submit.interrupted",
                        "interrupt received, cancelling at the next stage boundary"
                    );
                    cancel.cancel();
                }
            })
        };

        let outcome = app.pipeline.submit_with_cancel(&request.text, metadata, &cancel).await;
        interrupt.abort();

        match outcome {
            Ok(task) => {
                let message = match task.status {
                    TaskStatus::Assigned => format!(
                        "task {} assigned to {}",
                        task.id,
                        task.team.as_ref().map(|team| team.0.as_str()).unwrap_or("-")
                    ),
                    TaskStatus::Failed => format!(
                        "task {} failed: {}",
                        task.id,
                        task.last_error.as_deref().unwrap_or("unknown error")
                    ),
                    status => format!("task {} is {}", task.id, status.as_str()),
                };
                CommandResult::success_with_data("submit", message, &task)
            }
            Err(error) => CommandResult::pipeline_failure("submit", error, &correlation_id),
        }
    })
}

fn build_metadata(request: &SubmitRequest) -> Result<RequestMetadata, String> {
    let channel = if request.channel.trim().is_empty() { "cli" } else { request.channel.trim() };
    let mut metadata = RequestMetadata::from_channel(channel);
    for pair in &request.attributes {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("attribute `{pair}` must be written as key=value"));
        };
        if key.trim().is_empty() {
            return Err(format!("attribute `{pair}` has an empty key"));
        }
        metadata = metadata.with_attribute(key.trim(), value.trim());
    }
    if let Some(correlation_id) = &request.correlation_id {
        metadata = metadata.with_attribute(CORRELATION_ATTRIBUTE, correlation_id.clone());
    }
    Ok(metadata)
}
