use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::RoutingConfig;
use crate::domain::task::Category;
use crate::domain::team::{Team, TeamId};
use crate::errors::PipelineError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("unknown team `{0}`")]
    UnknownTeam(TeamId),
    #[error("team directory backend failure: {0}")]
    Backend(String),
}

impl From<DirectoryError> for PipelineError {
    fn from(value: DirectoryError) -> Self {
        match value {
            DirectoryError::UnknownTeam(team) => Self::UnknownTeam(team),
            DirectoryError::Backend(message) => Self::Directory(message),
        }
    }
}

/// Source of truth for teams and their open-task counts.
///
/// `increment_load` and `release_load` must be atomic per team and return the
/// count after the update.
#[async_trait]
pub trait TeamDirectory: Send + Sync {
    async fn list_teams(&self, category: Category) -> Result<Vec<TeamId>, DirectoryError>;
    async fn get_load(&self, team: &TeamId) -> Result<u32, DirectoryError>;
    async fn increment_load(&self, team: &TeamId) -> Result<u32, DirectoryError>;
    async fn release_load(&self, team: &TeamId) -> Result<u32, DirectoryError>;
}

struct TeamEntry {
    categories: BTreeSet<Category>,
    open_tasks: AtomicU32,
}

#[derive(Default)]
pub struct InMemoryTeamDirectory {
    teams: RwLock<BTreeMap<TeamId, TeamEntry>>,
}

impl InMemoryTeamDirectory {
    pub fn from_routing(routing: &RoutingConfig) -> Self {
        let mut teams: BTreeMap<TeamId, TeamEntry> = BTreeMap::new();
        for category in Category::ROUTABLE {
            for team in routing.teams_for(category) {
                teams
                    .entry(TeamId::new(team.clone()))
                    .or_insert_with(|| TeamEntry {
                        categories: BTreeSet::new(),
                        open_tasks: AtomicU32::new(0),
                    })
                    .categories
                    .insert(category);
            }
        }
        Self { teams: RwLock::new(teams) }
    }

    pub async fn insert_team(&self, category: Category, team: TeamId, open_tasks: u32) {
        let mut teams = self.teams.write().await;
        let entry = teams.entry(team).or_insert_with(|| TeamEntry {
            categories: BTreeSet::new(),
            open_tasks: AtomicU32::new(0),
        });
        entry.categories.insert(category);
        entry.open_tasks.store(open_tasks, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Vec<Team> {
        let teams = self.teams.read().await;
        teams
            .iter()
            .map(|(id, entry)| Team {
                id: id.clone(),
                open_tasks: entry.open_tasks.load(Ordering::SeqCst),
            })
            .collect()
    }
}

#[async_trait]
impl TeamDirectory for InMemoryTeamDirectory {
    async fn list_teams(&self, category: Category) -> Result<Vec<TeamId>, DirectoryError> {
        let teams = self.teams.read().await;
        Ok(teams
            .iter()
            .filter(|(_, entry)| entry.categories.contains(&category))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn get_load(&self, team: &TeamId) -> Result<u32, DirectoryError> {
        let teams = self.teams.read().await;
        teams
            .get(team)
            .map(|entry| entry.open_tasks.load(Ordering::SeqCst))
            .ok_or_else(|| DirectoryError::UnknownTeam(team.clone()))
    }

    async fn increment_load(&self, team: &TeamId) -> Result<u32, DirectoryError> {
        let teams = self.teams.read().await;
        let entry = teams.get(team).ok_or_else(|| DirectoryError::UnknownTeam(team.clone()))?;
        Ok(entry.open_tasks.fetch_add(1, Ordering::SeqCst).saturating_add(1))
    }

    async fn release_load(&self, team: &TeamId) -> Result<u32, DirectoryError> {
        let teams = self.teams.read().await;
        let entry = teams.get(team).ok_or_else(|| DirectoryError::UnknownTeam(team.clone()))?;
        let previous = entry
            .open_tasks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |load| Some(load.saturating_sub(1)))
            .unwrap_or_else(|load| load);
        Ok(previous.saturating_sub(1))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub team: TeamId,
    pub open_tasks: u32,
    /// Loads observed while choosing, in ascending id order.
    pub candidates: Vec<Team>,
}

impl Assignment {
    pub fn describe(&self) -> String {
        let loads = self
            .candidates
            .iter()
            .map(|team| format!("{}={}", team.id, team.open_tasks))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} (loads: {loads})", self.team)
    }
}

/// Least-loaded team selection. Selection and the load increment run under one
/// short lock so concurrent submissions cannot pick from a stale view.
pub struct AssignmentEngine {
    directory: Arc<dyn TeamDirectory>,
    selection: Mutex<()>,
}

impl AssignmentEngine {
    pub fn new(directory: Arc<dyn TeamDirectory>) -> Self {
        Self { directory, selection: Mutex::new(()) }
    }

    pub fn directory(&self) -> &Arc<dyn TeamDirectory> {
        &self.directory
    }

    /// Returns `None` for `Unknown`, which is never routed automatically.
    pub async fn assign(&self, category: Category) -> Result<Option<Assignment>, PipelineError> {
        if category == Category::Unknown {
            return Ok(None);
        }

        let _guard = self.selection.lock().await;
        let team_ids = self.directory.list_teams(category).await?;
        if team_ids.is_empty() {
            return Err(PipelineError::NoTeamAvailable { category });
        }

        let mut candidates = Vec::with_capacity(team_ids.len());
        for id in team_ids {
            let open_tasks = self.directory.get_load(&id).await?;
            candidates.push(Team { id, open_tasks });
        }
        candidates.sort_by(|left, right| left.id.cmp(&right.id));

        let chosen = candidates
            .iter()
            .min_by(|left, right| {
                left.open_tasks.cmp(&right.open_tasks).then_with(|| left.id.cmp(&right.id))
            })
            .map(|team| team.id.clone())
            .ok_or(PipelineError::NoTeamAvailable { category })?;

        let open_tasks = self.directory.increment_load(&chosen).await?;
        tracing::debug!(
            event_name = "assignment.team_selected",
            category = category.as_str(),
            team = %chosen,
            open_tasks,
            "team selected"
        );

        Ok(Some(Assignment { team: chosen, open_tasks, candidates }))
    }

    /// Reserves capacity on an operator-chosen team.
    pub async fn assign_manual(&self, team: &TeamId) -> Result<u32, PipelineError> {
        let _guard = self.selection.lock().await;
        self.directory.get_load(team).await?;
        Ok(self.directory.increment_load(team).await?)
    }

    pub async fn release(&self, team: &TeamId) -> Result<u32, PipelineError> {
        Ok(self.directory.release_load(team).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{AssignmentEngine, InMemoryTeamDirectory, TeamDirectory};
    use crate::config::RoutingConfig;
    use crate::domain::task::Category;
    use crate::domain::team::TeamId;
    use crate::errors::PipelineError;

    async fn directory_with(loads: &[(&str, u32)]) -> Arc<InMemoryTeamDirectory> {
        let directory = Arc::new(InMemoryTeamDirectory::default());
        for (team, load) in loads {
            directory.insert_team(Category::It, TeamId::new(*team), *load).await;
        }
        directory
    }

    #[tokio::test]
    async fn picks_least_loaded_team() {
        let directory = directory_with(&[("A", 5), ("B", 3)]).await;
        let engine = AssignmentEngine::new(directory.clone());

        let assignment =
            engine.assign(Category::It).await.expect("assignment").expect("routable category");
        assert_eq!(assignment.team, TeamId::new("B"));
        assert_eq!(assignment.open_tasks, 4);
        assert_eq!(directory.get_load(&TeamId::new("A")).await, Ok(5));
    }

    #[tokio::test]
    async fn equal_loads_break_ties_by_id() {
        let directory = directory_with(&[("B", 2), ("A", 2)]).await;
        let engine = AssignmentEngine::new(directory);

        let assignment =
            engine.assign(Category::It).await.expect("assignment").expect("routable category");
        assert_eq!(assignment.team, TeamId::new("A"));
        assert_eq!(assignment.describe(), "A (loads: A=2, B=2)");
    }

    #[tokio::test]
    async fn unknown_category_skips_directory() {
        let engine = AssignmentEngine::new(Arc::new(InMemoryTeamDirectory::default()));
        assert_eq!(engine.assign(Category::Unknown).await.expect("no error"), None);
    }

    #[tokio::test]
    async fn empty_candidate_set_is_fatal() {
        let engine = AssignmentEngine::new(directory_with(&[("it-a", 0)]).await);
        let error = engine.assign(Category::Hr).await.expect_err("no hr team");
        assert!(matches!(error, PipelineError::NoTeamAvailable { category: Category::Hr }));
    }

    #[tokio::test]
    async fn concurrent_assignments_spread_load() {
        let directory = directory_with(&[("A", 0), ("B", 0)]).await;
        let engine = Arc::new(AssignmentEngine::new(directory.clone()));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.assign(Category::It).await })
            })
            .collect();
        for handle in handles {
            handle.await.expect("join").expect("assignment");
        }

        let loads: Vec<u32> = directory.snapshot().await.iter().map(|team| team.open_tasks).collect();
        assert_eq!(loads, vec![5, 5]);
    }

    #[tokio::test]
    async fn manual_assignment_requires_known_team() {
        let directory = Arc::new(InMemoryTeamDirectory::from_routing(&RoutingConfig::default()));
        let engine = AssignmentEngine::new(directory.clone());

        let error = engine.assign_manual(&TeamId::new("nobody")).await.expect_err("unknown");
        assert!(matches!(error, PipelineError::UnknownTeam(_)));

        assert_eq!(engine.assign_manual(&TeamId::new("hr-people-ops")).await.expect("known"), 1);
        assert_eq!(engine.release(&TeamId::new("hr-people-ops")).await.expect("known"), 0);
        assert_eq!(engine.release(&TeamId::new("hr-people-ops")).await.expect("known"), 0);
    }
}
