use chrono::Utc;
use routedesk_core::config::RoutingConfig;
use routedesk_core::domain::task::Category;

use crate::connection::DbPool;
use crate::repositories::{encode_timestamp, RepositoryError};

/// Registers every team named in the routing table and rewrites its routes.
///
/// Existing teams keep their `open_tasks`; routes no longer present in the
/// configuration are removed. Runs in one transaction.
pub async fn seed_teams(
    pool: &DbPool,
    routing: &RoutingConfig,
) -> Result<SeedResult, RepositoryError> {
    let now = encode_timestamp(&Utc::now());
    let mut tx = pool.begin().await?;
    let mut teams = Vec::new();
    let mut routes = Vec::new();

    for category in Category::ROUTABLE {
        for team in routing.teams_for(category) {
            if !teams.contains(team) {
                teams.push(team.clone());
            }
            routes.push(RouteSeedInfo { team_id: team.clone(), category });
        }
    }

    for team in &teams {
        sqlx::query(
            "INSERT INTO team (id, open_tasks, created_at, updated_at)
             VALUES (?, 0, ?, ?)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(team)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM team_route").execute(&mut *tx).await?;
    for route in &routes {
        sqlx::query("INSERT INTO team_route (team_id, category) VALUES (?, ?)")
            .bind(&route.team_id)
            .bind(route.category.as_str())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    tracing::info!(
        event_name = "db.teams_seeded",
        teams = teams.len(),
        routes = routes.len(),
        "team routing seeded"
    );

    Ok(SeedResult { teams, routes })
}

/// Checks that every configured route is present in the database.
pub async fn verify_teams(
    pool: &DbPool,
    routing: &RoutingConfig,
) -> Result<VerificationResult, RepositoryError> {
    let mut checks = Vec::new();
    for category in Category::ROUTABLE {
        for team in routing.teams_for(category) {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM team_route WHERE team_id = ?1 AND category = ?2
                 )",
            )
            .bind(team)
            .bind(category.as_str())
            .fetch_one(pool)
            .await?;
            checks.push((format!("{}:{team}", category.as_str()), present == 1));
        }
    }

    let all_present = checks.iter().all(|(_, present)| *present);
    Ok(VerificationResult { all_present, checks })
}

#[derive(Debug)]
pub struct SeedResult {
    pub teams: Vec<String>,
    pub routes: Vec<RouteSeedInfo>,
}

#[derive(Debug)]
pub struct RouteSeedInfo {
    pub team_id: String,
    pub category: Category,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

#[cfg(test)]
mod tests {
    use routedesk_core::config::RoutingConfig;

    use super::{seed_teams, verify_teams};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seeding_registers_teams_and_routes() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let result = seed_teams(&pool, &RoutingConfig::default()).await.expect("seed");
        assert_eq!(result.teams.len(), 5);
        assert_eq!(result.routes.len(), 5);

        let verification = verify_teams(&pool, &RoutingConfig::default()).await.expect("verify");
        assert!(verification.all_present, "checks: {:?}", verification.checks);
    }

    #[tokio::test]
    async fn reseeding_preserves_load_and_drops_stale_routes() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        seed_teams(&pool, &RoutingConfig::default()).await.expect("seed");

        sqlx::query("UPDATE team SET open_tasks = 4 WHERE id = 'it-devops'")
            .execute(&pool)
            .await
            .expect("bump load");

        let narrowed = RoutingConfig {
            it: vec!["it-devops".to_string()],
            hr: vec!["it-devops".to_string()],
            operations: vec!["ops-facilities".to_string()],
        };
        seed_teams(&pool, &narrowed).await.expect("reseed");

        let load: i64 = sqlx::query_scalar("SELECT open_tasks FROM team WHERE id = 'it-devops'")
            .fetch_one(&pool)
            .await
            .expect("load");
        assert_eq!(load, 4);

        let routes: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM team_route")
            .fetch_one(&pool)
            .await
            .expect("routes");
        assert_eq!(routes, 3);

        let stale = verify_teams(&pool, &RoutingConfig::default()).await.expect("verify");
        assert!(!stale.all_present);
    }
}
