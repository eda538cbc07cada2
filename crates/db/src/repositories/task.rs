use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use routedesk_core::domain::task::{
    AuditRecord, Category, PipelineStage, Priority, RequestMetadata, Task, TaskId, TaskStatus,
};
use routedesk_core::domain::team::TeamId;
use routedesk_core::store::{StoreError, TaskStore};

use super::{encode_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

const TASK_COLUMNS: &str = "id,
    request_text,
    category,
    confidence,
    priority,
    team_id,
    status,
    source_channel,
    attributes_json,
    manual_override,
    last_error,
    created_at,
    updated_at";

pub struct SqlTaskRepository {
    pool: DbPool,
}

impl SqlTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_task(&self, task: &Task) -> Result<(), RepositoryError> {
        let attributes_json = serde_json::to_string(&task.metadata.attributes)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO task (
                id,
                request_text,
                category,
                confidence,
                priority,
                team_id,
                status,
                source_channel,
                attributes_json,
                manual_override,
                last_error,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                request_text = excluded.request_text,
                category = excluded.category,
                confidence = excluded.confidence,
                priority = excluded.priority,
                team_id = excluded.team_id,
                status = excluded.status,
                source_channel = excluded.source_channel,
                attributes_json = excluded.attributes_json,
                manual_override = excluded.manual_override,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
        )
        .bind(&task.id.0)
        .bind(&task.request_text)
        .bind(task.category.as_str())
        .bind(task.confidence)
        .bind(task.priority.as_str())
        .bind(task.team.as_ref().map(|team| team.0.as_str()))
        .bind(task.status.as_str())
        .bind(task.metadata.source_channel.as_deref())
        .bind(attributes_json)
        .bind(i64::from(task.manual_override))
        .bind(task.last_error.as_deref())
        .bind(encode_timestamp(&task.created_at))
        .bind(encode_timestamp(&task.updated_at))
        .execute(&mut *tx)
        .await?;

        replace_audit_trail(&mut tx, task).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Compare-and-set write: the row is updated only while its stored status
    /// is still `expected`. Returns `false` and leaves the row alone otherwise.
    pub async fn save_task_if_status(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> Result<bool, RepositoryError> {
        let attributes_json = serde_json::to_string(&task.metadata.attributes)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE task SET
                category = ?,
                confidence = ?,
                priority = ?,
                team_id = ?,
                status = ?,
                attributes_json = ?,
                manual_override = ?,
                last_error = ?,
                updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(task.category.as_str())
        .bind(task.confidence)
        .bind(task.priority.as_str())
        .bind(task.team.as_ref().map(|team| team.0.as_str()))
        .bind(task.status.as_str())
        .bind(attributes_json)
        .bind(i64::from(task.manual_override))
        .bind(task.last_error.as_deref())
        .bind(encode_timestamp(&task.updated_at))
        .bind(&task.id.0)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        replace_audit_trail(&mut tx, task).await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM task WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_status(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {TASK_COLUMNS} FROM task WHERE status = ? ORDER BY created_at ASC, id ASC"
            ))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM task ORDER BY created_at ASC, id ASC"))
                .fetch_all(&self.pool)
                .await?
        };

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            tasks.push(self.hydrate(row).await?);
        }
        Ok(tasks)
    }

    async fn hydrate(&self, row: SqliteRow) -> Result<Task, RepositoryError> {
        let mut task = task_from_row(row)?;
        let audit_rows = sqlx::query(
            "SELECT stage, output, confidence, recorded_at
             FROM task_audit
             WHERE task_id = ?
             ORDER BY seq ASC",
        )
        .bind(&task.id.0)
        .fetch_all(&self.pool)
        .await?;

        task.audit_trail =
            audit_rows.into_iter().map(audit_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(task)
    }
}

async fn replace_audit_trail(
    tx: &mut Transaction<'_, Sqlite>,
    task: &Task,
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM task_audit WHERE task_id = ?")
        .bind(&task.id.0)
        .execute(&mut **tx)
        .await?;

    for (seq, record) in task.audit_trail.iter().enumerate() {
        sqlx::query(
            "INSERT INTO task_audit (task_id, seq, stage, output, confidence, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id.0)
        .bind(seq as i64)
        .bind(record.stage.as_str())
        .bind(&record.output)
        .bind(record.confidence)
        .bind(encode_timestamp(&record.recorded_at))
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl TaskStore for SqlTaskRepository {
    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        Ok(self.save_task(task).await?)
    }

    async fn save_if_status(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> Result<bool, StoreError> {
        Ok(self.save_task_if_status(task, expected).await?)
    }

    async fn load(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.find_by_id(id).await?)
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        Ok(self.find_by_status(Some(status)).await?)
    }

    async fn list_all(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.find_by_status(None).await?)
    }
}

fn decode<T>(column: &str, raw: &str, parsed: Option<T>) -> Result<T, RepositoryError> {
    parsed.ok_or_else(|| RepositoryError::Decode(format!("unknown value in `{column}`: `{raw}`")))
}

fn task_from_row(row: SqliteRow) -> Result<Task, RepositoryError> {
    let category_raw = row.try_get::<String, _>("category")?;
    let priority_raw = row.try_get::<String, _>("priority")?;
    let status_raw = row.try_get::<String, _>("status")?;
    let attributes_raw = row.try_get::<String, _>("attributes_json")?;
    let attributes: BTreeMap<String, String> = serde_json::from_str(&attributes_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid attributes_json: {error}")))?;

    Ok(Task {
        id: TaskId(row.try_get("id")?),
        request_text: row.try_get("request_text")?,
        category: decode("category", &category_raw, Category::parse(&category_raw))?,
        confidence: row.try_get("confidence")?,
        priority: decode("priority", &priority_raw, Priority::parse(&priority_raw))?,
        team: row.try_get::<Option<String>, _>("team_id")?.map(TeamId),
        status: decode("status", &status_raw, TaskStatus::parse(&status_raw))?,
        metadata: RequestMetadata {
            source_channel: row.try_get("source_channel")?,
            attributes,
        },
        manual_override: row.try_get::<i64, _>("manual_override")? != 0,
        last_error: row.try_get("last_error")?,
        audit_trail: Vec::new(),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn audit_from_row(row: SqliteRow) -> Result<AuditRecord, RepositoryError> {
    let stage_raw = row.try_get::<String, _>("stage")?;
    Ok(AuditRecord {
        stage: decode("stage", &stage_raw, PipelineStage::parse(&stage_raw))?,
        output: row.try_get("output")?,
        confidence: row.try_get("confidence")?,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use routedesk_core::domain::task::{
        AuditRecord, Category, PipelineStage, Priority, RequestMetadata, Task, TaskStatus,
    };
    use routedesk_core::domain::team::TeamId;
    use routedesk_core::store::TaskStore;

    use super::SqlTaskRepository;
    use crate::migrations;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_task() -> Task {
        let mut task = Task::new(
            "Server is down, urgent!",
            RequestMetadata::from_channel("slack").with_attribute("requester", "U123"),
        );
        task.category = Category::It;
        task.confidence = 0.97;
        task.priority = Priority::Critical;
        task.record(AuditRecord::new(PipelineStage::Extract, "summary", None));
        task.record(AuditRecord::new(PipelineStage::Classify, "IT", Some(0.97)));
        task
    }

    #[tokio::test]
    async fn round_trips_task_with_audit_trail() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());
        let task = sample_task();

        repo.save(&task).await.expect("save");

        let found = repo.load(&task.id).await.expect("load");
        assert_eq!(found, Some(task));
        pool.close().await;
    }

    #[tokio::test]
    async fn save_replaces_audit_rows_and_updates_status() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());
        let mut task = sample_task();
        repo.save(&task).await.expect("first save");

        task.team = Some(TeamId::new("it-devops"));
        task.transition_to(TaskStatus::Assigned).expect("pending -> assigned");
        task.record(AuditRecord::new(PipelineStage::Assign, "it-devops", None));
        repo.save(&task).await.expect("second save");

        let found = repo.load(&task.id).await.expect("load").expect("task exists");
        assert_eq!(found.audit_trail.len(), 3);
        assert_eq!(found.status, TaskStatus::Assigned);
        assert_eq!(found.team, Some(TeamId::new("it-devops")));

        let (audit_rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM task_audit")
            .fetch_one(&pool)
            .await
            .expect("count audit rows");
        assert_eq!(audit_rows, 3);
        pool.close().await;
    }

    #[tokio::test]
    async fn lists_by_status_oldest_first() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());

        let first = sample_task();
        let mut second = sample_task();
        second.created_at = first.created_at + chrono::Duration::seconds(5);
        let mut review = sample_task();
        review.transition_to(TaskStatus::NeedsReview).expect("pending -> needs_review");

        repo.save(&second).await.expect("save");
        repo.save(&first).await.expect("save");
        repo.save(&review).await.expect("save");

        let pending = repo.list_by_status(TaskStatus::Pending).await.expect("list");
        let ids: Vec<_> = pending.iter().map(|task| task.id.clone()).collect();
        assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);
        assert_eq!(repo.list_all().await.expect("list all").len(), 3);
        pool.close().await;
    }

    #[tokio::test]
    async fn conditional_save_rejects_stale_status() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());
        let mut task = sample_task();
        task.transition_to(TaskStatus::NeedsReview).expect("pending -> needs_review");
        repo.save(&task).await.expect("save");

        let mut overridden = task.clone();
        overridden.team = Some(TeamId::new("hr-people-ops"));
        overridden.manual_override = true;
        overridden.transition_to(TaskStatus::Assigned).expect("needs_review -> assigned");
        overridden.record(AuditRecord::new(PipelineStage::Override, "hr-people-ops", None));
        assert!(repo.save_if_status(&overridden, TaskStatus::NeedsReview).await.expect("first"));

        let mut late = task.clone();
        late.team = Some(TeamId::new("it-devops"));
        late.transition_to(TaskStatus::Assigned).expect("needs_review -> assigned");
        assert!(!repo.save_if_status(&late, TaskStatus::NeedsReview).await.expect("second"));

        let stored = repo.load(&task.id).await.expect("load").expect("task exists");
        assert_eq!(stored, overridden);
        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_task_is_none() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());
        let missing = routedesk_core::domain::task::TaskId("missing".to_string());
        assert_eq!(repo.load(&missing).await.expect("load"), None);
        pool.close().await;
    }
}
