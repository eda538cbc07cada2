use routedesk_core::config::LoadOptions;
use routedesk_core::domain::task::TaskId;
use routedesk_core::domain::team::TeamId;

use crate::commands::bootstrap::run_with_app;
use crate::commands::CommandResult;

/// Operator override: routes a task waiting for review to a chosen team.
pub fn run(options: &LoadOptions, task_id: &str, team: &str, actor: &str) -> CommandResult {
    let id = TaskId(task_id.trim().to_string());
    let team = TeamId::new(team.trim());
    let actor = actor.trim().to_string();

    run_with_app("override", options, |app| async move {
        match app.pipeline.override_assignment(&id, &team, &actor).await {
            Ok(task) => CommandResult::success_with_data(
                "override",
                format!("task {} assigned to {team} by {actor}", task.id),
                &task,
            ),
            Err(error) => CommandResult::pipeline_failure("override", error, &id.0),
        }
    })
}
