use routedesk_core::config::{AppConfig, LoadOptions};
use routedesk_db::{connect_from_config, migrations, verify_teams};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: &LoadOptions, json_output: bool) -> String {
    let report = build_report(options);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(options: &LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options.clone()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["database_connectivity", "migration_state", "team_routing"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Connectivity, applied migrations and seeded routes. Does not apply
/// migrations itself.
fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    skipped("migration_state", "database is unreachable"),
                    skipped("team_routing", "database is unreachable"),
                ];
            }
        };

        let mut checks = vec![DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        }];

        let expected = migrations::MIGRATOR
            .iter()
            .filter(|migration| migration.migration_type.is_up_migration())
            .count() as i64;
        let migrated = match migrations::applied_count(&pool).await {
            Ok(applied) if applied >= expected => {
                checks.push(DoctorCheck {
                    name: "migration_state",
                    status: CheckStatus::Pass,
                    details: format!("{applied} migration(s) applied"),
                });
                true
            }
            Ok(applied) => {
                checks.push(DoctorCheck {
                    name: "migration_state",
                    status: CheckStatus::Fail,
                    details: format!(
                        "{applied} of {expected} migration(s) applied; run `routedesk migrate`"
                    ),
                });
                false
            }
            Err(_) => {
                checks.push(DoctorCheck {
                    name: "migration_state",
                    status: CheckStatus::Fail,
                    details: "no migrations applied; run `routedesk migrate`".to_string(),
                });
                false
            }
        };

        if migrated {
            checks.push(match verify_teams(&pool, &config.routing).await {
                Ok(verification) if verification.all_present => DoctorCheck {
                    name: "team_routing",
                    status: CheckStatus::Pass,
                    details: format!("{} route(s) registered", verification.checks.len()),
                },
                Ok(verification) => DoctorCheck {
                    name: "team_routing",
                    status: CheckStatus::Fail,
                    details: format!(
                        "missing routes: {}; run `routedesk seed`",
                        verification
                            .checks
                            .iter()
                            .filter_map(|(check, present)| (!present).then_some(check.as_str()))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                },
                Err(error) => DoctorCheck {
                    name: "team_routing",
                    status: CheckStatus::Fail,
                    details: error.to_string(),
                },
            });
        } else {
            checks.push(skipped("team_routing", "schema is not migrated"));
        }

        pool.close().await;
        checks
    })
}

fn skipped(name: &'static str, reason: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
