use routedesk_core::config::LoadOptions;
use routedesk_core::domain::task::TaskId;

use crate::commands::bootstrap::run_with_app;
use crate::commands::CommandResult;

pub fn run(options: &LoadOptions, task_id: &str) -> CommandResult {
    let id = TaskId(task_id.trim().to_string());
    run_with_app("show", options, |app| async move {
        match app.pipeline.get_task(&id).await {
            Ok(task) => CommandResult::success_with_data(
                "show",
                format!(
                    "task {} is {} ({}, {} priority)",
                    task.id,
                    task.status.as_str(),
                    task.category,
                    task.priority.as_str()
                ),
                &task,
            ),
            Err(error) => CommandResult::pipeline_failure("show", error, &id.0),
        }
    })
}
