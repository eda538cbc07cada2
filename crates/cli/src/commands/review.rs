use routedesk_core::config::LoadOptions;
use routedesk_core::domain::task::TaskStatus;
use serde::Serialize;

use crate::commands::bootstrap::run_with_app;
use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ReviewItem {
    id: String,
    category: &'static str,
    confidence: f64,
    priority: &'static str,
    summary: String,
    created_at: String,
}

/// Lists the review queue, oldest first.
pub fn run(options: &LoadOptions) -> CommandResult {
    run_with_app("review", options, |app| async move {
        let tasks = match app.pipeline.list_by_status(TaskStatus::NeedsReview).await {
            Ok(tasks) => tasks,
            Err(error) => return CommandResult::pipeline_failure("review", error, "review"),
        };

        let items = tasks
            .iter()
            .map(|task| ReviewItem {
                id: task.id.0.clone(),
                category: task.category.as_str(),
                confidence: task.confidence,
                priority: task.priority.as_str(),
                summary: preview(&task.request_text),
                created_at: task.created_at.to_rfc3339(),
            })
            .collect::<Vec<_>>();
        CommandResult::success_with_data(
            "review",
            format!("{} task(s) awaiting review", items.len()),
            items,
        )
    })
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 80;
    let line = text.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= LIMIT {
        return line.to_string();
    }
    let cut: String = line.chars().take(LIMIT).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::preview;

    #[test]
    fn preview_keeps_first_line_and_caps_length() {
        assert_eq!(preview("VPN down\nsecond line"), "VPN down");
        let long = "a".repeat(120);
        assert_eq!(preview(&long).chars().count(), 83);
    }
}
