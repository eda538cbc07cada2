pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use fixtures::{seed_teams, verify_teams, RouteSeedInfo, SeedResult, VerificationResult};
pub use repositories::{RepositoryError, SqlTaskRepository, SqlTeamDirectory};
