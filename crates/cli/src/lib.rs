pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use routedesk_core::config::{AppConfig, ConfigOverrides, LoadOptions};

use crate::commands::submit::SubmitRequest;

#[derive(Debug, Parser)]
#[command(
    name = "routedesk",
    about = "Routedesk operator CLI",
    long_about = "Submit workflow requests, work the review queue, and inspect routing state.",
    after_help = "Examples:\n  routedesk migrate\n  routedesk seed\n  routedesk submit \"VPN is down, urgent\"\n  routedesk review\n  routedesk resume\n  routedesk override <task-id> it-devops --actor alice\n  routedesk report --text"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a routedesk.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url for this invocation")]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Register the configured routing table (teams and categories)")]
    Seed,
    #[command(about = "Run a request through the pipeline and print the resulting task")]
    Submit {
        #[arg(help = "Free-form request text")]
        text: String,
        #[arg(long, default_value = "cli", help = "Source channel recorded on the task")]
        channel: String,
        #[arg(long = "attr", value_name = "KEY=VALUE", help = "Extra request metadata")]
        attributes: Vec<String>,
        #[arg(long, help = "Correlation id for logs and audit events")]
        correlation_id: Option<String>,
    },
    #[command(about = "Show one task with its audit trail")]
    Show {
        #[arg(help = "Task id")]
        task_id: String,
    },
    #[command(about = "List tasks waiting for operator review")]
    Review,
    #[command(about = "Finish tasks left pending by an interrupted submit")]
    Resume,
    #[command(
        name = "override",
        about = "Assign a task waiting for review to a team chosen by an operator"
    )]
    Override {
        #[arg(help = "Task id")]
        task_id: String,
        #[arg(help = "Team id")]
        team: String,
        #[arg(long, default_value = "operator", help = "Who made the decision")]
        actor: String,
    },
    #[command(about = "Summarize all tasks and close the assigned ones")]
    Report {
        #[arg(long, help = "Render the summary as text in the message field")]
        text: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, DB connectivity, migrations, and team routing")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        config_path: cli.config,
        require_file: false,
        overrides: ConfigOverrides { database_url: cli.database_url, ..ConfigOverrides::default() },
    };

    let logging = AppConfig::load(options.clone())
        .map(|config| config.logging)
        .unwrap_or_else(|_| AppConfig::default().logging);
    logging::init_logging(&logging);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Seed => commands::seed::run(&options),
        Command::Submit { text, channel, attributes, correlation_id } => commands::submit::run(
            &options,
            SubmitRequest { text, channel, attributes, correlation_id },
        ),
        Command::Show { task_id } => commands::show::run(&options, &task_id),
        Command::Review => commands::review::run(&options),
        Command::Resume => commands::resume::run(&options),
        Command::Override { task_id, team, actor } => {
            commands::assign::run(&options, &task_id, &team, &actor)
        }
        Command::Report { text } => commands::report::run(&options, text),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(&options, json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Command};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_override_with_global_database_url() {
        let cli = Cli::parse_from([
            "routedesk",
            "override",
            "task-1",
            "it-devops",
            "--actor",
            "alice",
            "--database-url",
            "sqlite::memory:",
        ]);
        assert_eq!(cli.database_url.as_deref(), Some("sqlite::memory:"));
        assert!(matches!(
            cli.command,
            Command::Override { ref task_id, ref team, ref actor }
                if task_id == "task-1" && team == "it-devops" && actor == "alice"
        ));
    }

    #[test]
    fn parses_repeated_submit_attributes() {
        let cli = Cli::parse_from([
            "routedesk",
            "submit",
            "printer on floor 3 is jammed",
            "--attr",
            "requester=bob",
            "--attr",
            "floor=3",
        ]);
        let Command::Submit { attributes, channel, .. } = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(attributes, vec!["requester=bob", "floor=3"]);
        assert_eq!(channel, "cli");
    }
}
