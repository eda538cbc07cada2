use routedesk_core::config::LoadOptions;
use routedesk_core::reporter::Reporter;

use crate::commands::bootstrap::run_with_app;
use crate::commands::CommandResult;

/// Summarizes all tasks and closes the assigned ones. With `text` the
/// human-readable rendering goes into `message`.
pub fn run(options: &LoadOptions, text: bool) -> CommandResult {
    run_with_app("report", options, |app| async move {
        match app.pipeline.generate_report().await {
            Ok(report) => {
                let message = if text {
                    Reporter.render_text(&report)
                } else {
                    format!(
                        "{} task(s) summarized, {} closed",
                        report.total,
                        report.closed.len()
                    )
                };
                CommandResult::success_with_data("report", message, &report)
            }
            Err(error) => CommandResult::pipeline_failure("report", error, "report"),
        }
    })
}
