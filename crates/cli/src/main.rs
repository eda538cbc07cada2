use std::process::ExitCode;

fn main() -> ExitCode {
    routedesk_cli::run()
}
