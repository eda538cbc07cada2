use routedesk_core::config::LoadOptions;
use serde::Serialize;

use crate::commands::bootstrap::run_with_app;
use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ResumedTask {
    id: String,
    status: &'static str,
    category: &'static str,
    priority: &'static str,
    team: Option<String>,
}

/// Finishes tasks a cancelled submission left `Pending`.
pub fn run(options: &LoadOptions) -> CommandResult {
    run_with_app("resume", options, |app| async move {
        let tasks = match app.pipeline.resume_pending().await {
            Ok(tasks) => tasks,
            Err(error) => return CommandResult::pipeline_failure("resume", error, "resume"),
        };

        let items = tasks
            .iter()
            .map(|task| ResumedTask {
                id: task.id.0.clone(),
                status: task.status.as_str(),
                category: task.category.as_str(),
                priority: task.priority.as_str(),
                team: task.team.as_ref().map(|team| team.0.clone()),
            })
            .collect::<Vec<_>>();
        CommandResult::success_with_data(
            "resume",
            format!("{} pending task(s) resumed", items.len()),
            items,
        )
    })
}
