use routedesk_core::config::LoadOptions;
use routedesk_db::{seed_teams, verify_teams};
use serde::Serialize;

use crate::commands::bootstrap::run_with_app;
use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct SeededRoute {
    team: String,
    category: &'static str,
}

pub fn run(options: &LoadOptions) -> CommandResult {
    run_with_app("seed", options, |app| async move {
        let seeded = match seed_teams(&app.db_pool, &app.config.routing).await {
            Ok(seeded) => seeded,
            Err(error) => {
                return CommandResult::failure("seed", "seed_execution", error.to_string(), 5)
            }
        };

        let verification = match verify_teams(&app.db_pool, &app.config.routing).await {
            Ok(verification) => verification,
            Err(error) => {
                return CommandResult::failure("seed", "seed_verification", error.to_string(), 6)
            }
        };
        if !verification.all_present {
            return CommandResult::failure(
                "seed",
                "seed_verification",
                verification_failure_message(&verification.checks),
                6,
            );
        }

        let routes = seeded
            .routes
            .iter()
            .map(|route| SeededRoute {
                team: route.team_id.clone(),
                category: route.category.as_str(),
            })
            .collect::<Vec<_>>();
        let lines = routes
            .iter()
            .map(|route| format!("  - {}: {}", route.category, route.team))
            .collect::<Vec<_>>();
        CommandResult::success_with_data(
            "seed",
            format!("registered {} team(s):\n{}", seeded.teams.len(), lines.join("\n")),
            routes,
        )
    })
}

fn verification_failure_message(checks: &[(String, bool)]) -> String {
    let failed_checks = checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
        .collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some team routes failed to load".to_string()
    } else {
        format!("Route verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_failure_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = vec![
            ("IT:it-devops".to_string(), true),
            ("HR:hr-people-ops".to_string(), false),
            ("Operations:ops-facilities".to_string(), false),
        ];

        assert_eq!(
            verification_failure_message(&checks),
            "Route verification failed for checks: HR:hr-people-ops, Operations:ops-facilities"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = vec![("IT:it-devops".to_string(), true)];
        assert_eq!(verification_failure_message(&checks), "Some team routes failed to load");
    }
}
