use chrono::Utc;
use sqlx::Row;

use routedesk_core::assignment::{DirectoryError, TeamDirectory};
use routedesk_core::domain::task::Category;
use routedesk_core::domain::team::{Team, TeamId};

use super::{encode_timestamp, parse_u32, RepositoryError};
use crate::DbPool;

/// Team directory backed by the `team` and `team_route` tables.
///
/// Load updates are single `UPDATE ... RETURNING` statements, so each one is
/// atomic for the team it touches.
pub struct SqlTeamDirectory {
    pool: DbPool,
}

impl SqlTeamDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_routes(&self, category: Category) -> Result<Vec<TeamId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT team_id FROM team_route WHERE category = ? ORDER BY team_id ASC",
        )
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(TeamId(row.try_get::<String, _>("team_id")?)))
            .collect()
    }

    pub async fn find_load(&self, team: &TeamId) -> Result<Option<u32>, RepositoryError> {
        let row = sqlx::query("SELECT open_tasks FROM team WHERE id = ?")
            .bind(&team.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| parse_u32("open_tasks", row.try_get("open_tasks")?)).transpose()
    }

    /// Every registered team with its current load, ordered by id.
    pub async fn list_all(&self) -> Result<Vec<Team>, RepositoryError> {
        let rows = sqlx::query("SELECT id, open_tasks FROM team ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Team {
                    id: TeamId(row.try_get("id")?),
                    open_tasks: parse_u32("open_tasks", row.try_get("open_tasks")?)?,
                })
            })
            .collect()
    }

    async fn adjust_load(&self, team: &TeamId, sql: &str) -> Result<Option<u32>, RepositoryError> {
        let row = sqlx::query(sql)
            .bind(encode_timestamp(&Utc::now()))
            .bind(&team.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| parse_u32("open_tasks", row.try_get("open_tasks")?)).transpose()
    }
}

#[async_trait::async_trait]
impl TeamDirectory for SqlTeamDirectory {
    async fn list_teams(&self, category: Category) -> Result<Vec<TeamId>, DirectoryError> {
        Ok(self.find_routes(category).await?)
    }

    async fn get_load(&self, team: &TeamId) -> Result<u32, DirectoryError> {
        self.find_load(team).await?.ok_or_else(|| DirectoryError::UnknownTeam(team.clone()))
    }

    async fn increment_load(&self, team: &TeamId) -> Result<u32, DirectoryError> {
        self.adjust_load(
            team,
            "UPDATE team
             SET open_tasks = open_tasks + 1, updated_at = ?
             WHERE id = ?
             RETURNING open_tasks",
        )
        .await?
        .ok_or_else(|| DirectoryError::UnknownTeam(team.clone()))
    }

    async fn release_load(&self, team: &TeamId) -> Result<u32, DirectoryError> {
        self.adjust_load(
            team,
            "UPDATE team
             SET open_tasks = MAX(open_tasks - 1, 0), updated_at = ?
             WHERE id = ?
             RETURNING open_tasks",
        )
        .await?
        .ok_or_else(|| DirectoryError::UnknownTeam(team.clone()))
    }
}
