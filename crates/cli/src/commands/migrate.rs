use routedesk_core::config::LoadOptions;
use routedesk_db::{connect_from_config, migrations};

use crate::commands::bootstrap::run_with_config;
use crate::commands::CommandResult;

pub fn run(options: &LoadOptions) -> CommandResult {
    run_with_config("migrate", options, |config| async move {
        let result = async {
            let pool = connect_from_config(&config.database)
                .await
                .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5u8))?;
            let applied = migrations::applied_count(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5u8))?;
            pool.close().await;
            Ok::<i64, (&'static str, String, u8)>(applied)
        }
        .await;

        match result {
            Ok(applied) => CommandResult::success(
                "migrate",
                format!("applied pending migrations ({applied} recorded)"),
            ),
            Err((error_class, message, exit_code)) => {
                CommandResult::failure("migrate", error_class, message, exit_code)
            }
        }
    })
}
