//! Request pipeline: extract, classify, prioritize, assign, persist.
//!
//! Valid input never surfaces a stage fault to the caller. Classifier
//! exhaustion and fatal assignment errors produce a `Failed` task; only blank
//! input is rejected outright. Persistence failures hand the in-memory task
//! back inside [`PipelineError::Persistence`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::assignment::{AssignmentEngine, TeamDirectory};
use crate::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use crate::classifier::{ClassifierAgent, TextClassifier};
use crate::config::PipelineConfig;
use crate::domain::intent::RequestIntent;
use crate::domain::task::{
    AuditRecord, Category, PipelineStage, RequestMetadata, Task, TaskId, TaskStatus,
};
use crate::domain::team::TeamId;
use crate::errors::{DomainError, PipelineError};
use crate::extractor::IntentExtractor;
use crate::lifecycle::{LifecycleError, TaskEvent, TaskLifecycle};
use crate::priority::PriorityResolver;
use crate::reporter::{Reporter, TaskReport};
use crate::store::{StoreError, TaskStore};

/// Metadata attribute used as the correlation id when the caller provides one.
pub const CORRELATION_ATTRIBUTE: &str = "correlation_id";

#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Pipeline {
    extractor: IntentExtractor,
    classifier: ClassifierAgent,
    priority: PriorityResolver,
    assignment: AssignmentEngine,
    lifecycle: TaskLifecycle,
    reporter: Reporter,
    store: Arc<dyn TaskStore>,
    audit: Arc<dyn AuditSink>,
    review_threshold: f64,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        classifier: Arc<dyn TextClassifier>,
        directory: Arc<dyn TeamDirectory>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            extractor: IntentExtractor::from_config(config),
            classifier: ClassifierAgent::new(classifier, config),
            priority: PriorityResolver::from_config(config),
            assignment: AssignmentEngine::new(directory),
            lifecycle: TaskLifecycle,
            reporter: Reporter,
            store,
            audit: Arc::new(TracingAuditSink),
            review_threshold: config.review_threshold,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn review_threshold(&self) -> f64 {
        self.review_threshold
    }

    pub async fn submit(
        &self,
        text: &str,
        metadata: RequestMetadata,
    ) -> Result<Task, PipelineError> {
        self.submit_with_cancel(text, metadata, &CancellationFlag::default()).await
    }

    pub async fn submit_with_cancel(
        &self,
        text: &str,
        metadata: RequestMetadata,
        cancel: &CancellationFlag,
    ) -> Result<Task, PipelineError> {
        let correlation_id = correlation_id(&metadata);

        let intent = match self.extractor.extract(text) {
            Ok(intent) => intent,
            Err(error) => {
                self.audit.emit(
                    AuditEvent::new(
                        None,
                        correlation_id.clone(),
                        "task.rejected",
                        AuditCategory::Ingress,
                        "pipeline",
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error_class", error.error_class()),
                );
                return Err(error);
            }
        };

        let mut task = Task::new(text, metadata);
        let audit = AuditContext::new(Some(task.id.clone()), correlation_id, "pipeline");
        task.record(AuditRecord::new(PipelineStage::Extract, describe_intent(&intent), None));
        self.persist(&task).await?;
        tracing::info!(
            event_name = "pipeline.task_created",
            task_id = %task.id,
            correlation_id = %audit.correlation_id,
            truncated = intent.truncated,
            urgent = intent.is_urgent(),
            "task created"
        );
        self.checkpoint(&task, &audit, cancel).await?;

        self.run_stages(task, &intent, &audit, cancel).await
    }

    /// Picks up every task left `Pending` (for example by cancellation),
    /// oldest first, and runs the stages it has not recorded yet. Tasks that
    /// another writer moves on in the meantime are skipped.
    pub async fn resume_pending(&self) -> Result<Vec<Task>, PipelineError> {
        let pending = self.store.list_by_status(TaskStatus::Pending).await?;
        let mut resumed = Vec::with_capacity(pending.len());

        for task in pending {
            let intent = self.extractor.extract(&task.request_text)?;
            let audit =
                AuditContext::new(Some(task.id.clone()), correlation_id(&task.metadata), "pipeline");
            tracing::info!(
                event_name = "pipeline.task_resumed",
                task_id = %task.id,
                correlation_id = %audit.correlation_id,
                stages = task.audit_trail.len(),
                "resuming pending task"
            );

            match self.run_stages(task, &intent, &audit, &CancellationFlag::default()).await {
                Ok(task) => resumed.push(task),
                Err(PipelineError::Domain(DomainError::Lifecycle(
                    LifecycleError::ConcurrentTransition { .. },
                ))) => {}
                Err(error) => return Err(error),
            }
        }

        Ok(resumed)
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<Task, PipelineError> {
        self.store.load(id).await?.ok_or_else(|| PipelineError::TaskNotFound(id.clone()))
    }

    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, PipelineError> {
        Ok(self.store.list_by_status(status).await?)
    }

    /// Moves a `NeedsReview` task to `Assigned` on an operator-chosen team.
    /// Of two concurrent overrides only the first stored one wins; the other
    /// gives its reservation back and fails with a lifecycle error.
    pub async fn override_assignment(
        &self,
        id: &TaskId,
        team: &TeamId,
        actor: &str,
    ) -> Result<Task, PipelineError> {
        let mut task = self.get_task(id).await?;
        let expected = task.status;
        let audit = AuditContext::new(Some(task.id.clone()), correlation_id(&task.metadata), actor);

        self.lifecycle.apply(expected, TaskEvent::ManualOverride)?;
        let open_tasks = self.assignment.assign_manual(team).await?;

        task.team = Some(team.clone());
        task.manual_override = true;
        task.record(AuditRecord::new(
            PipelineStage::Override,
            format!("{team} assigned by {actor} (open tasks: {open_tasks})"),
            None,
        ));
        self.lifecycle.advance_with_audit(
            &mut task,
            TaskEvent::ManualOverride,
            self.audit.as_ref(),
            &audit,
        )?;

        match self.persist_if(&task, expected).await {
            Ok(true) => {}
            Ok(false) => {
                self.release_reservation(&task).await;
                return Err(conflict(&task, expected, TaskEvent::ManualOverride));
            }
            Err(error) => {
                self.release_reservation(&task).await;
                return Err(error);
            }
        }

        self.audit.emit(
            AuditEvent::new(
                Some(task.id.clone()),
                audit.correlation_id.clone(),
                "task.override_applied",
                AuditCategory::Assignment,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("team", team.0.clone()),
        );
        Ok(task)
    }

    /// Summarizes every stored task, then closes the `Assigned` ones and
    /// releases their team capacity. A task closed by a concurrent report is
    /// released only once.
    pub async fn generate_report(&self) -> Result<TaskReport, PipelineError> {
        let tasks = self.store.list_all().await?;
        let mut report = self.reporter.summarize(&tasks);
        let audit_base = AuditContext::new(None, Uuid::new_v4().to_string(), "reporter");

        for mut task in tasks.into_iter().filter(|task| task.status == TaskStatus::Assigned) {
            let audit = AuditContext { task_id: Some(task.id.clone()), ..audit_base.clone() };
            self.lifecycle.advance_with_audit(
                &mut task,
                TaskEvent::ReportGenerated,
                self.audit.as_ref(),
                &audit,
            )?;
            task.record(AuditRecord::new(PipelineStage::Close, "closed by report", None));
            if !self.persist_if(&task, TaskStatus::Assigned).await? {
                tracing::info!(
                    event_name = "pipeline.close_skipped",
                    task_id = %task.id,
                    "task already moved on by another writer"
                );
                continue;
            }

            if let Some(team) = &task.team {
                if let Err(error) = self.assignment.release(team).await {
                    tracing::warn!(
                        event_name = "pipeline.release_failed",
                        task_id = %task.id,
                        team = %team,
                        error = %error,
                        "could not release team capacity"
                    );
                }
            }

            self.audit.emit(AuditEvent::new(
                Some(task.id.clone()),
                audit.correlation_id.clone(),
                "task.closed",
                AuditCategory::Reporting,
                audit.actor.clone(),
                AuditOutcome::Success,
            ));
            report.closed.push(task.id);
        }

        tracing::info!(
            event_name = "pipeline.report_generated",
            total = report.total,
            closed = report.closed.len(),
            "report generated"
        );
        Ok(report)
    }

    /// Classify, prioritize and route a `Pending` task, skipping stages its
    /// trail already holds.
    async fn run_stages(
        &self,
        mut task: Task,
        intent: &RequestIntent,
        audit: &AuditContext,
        cancel: &CancellationFlag,
    ) -> Result<Task, PipelineError> {
        if !reached(&task, PipelineStage::Classify) {
            let run = self.classifier.classify(&intent.raw_text).await;
            for failed in &run.failed_attempts {
                task.record(AuditRecord::new(
                    PipelineStage::ClassifyAttempt,
                    format!("attempt {} failed: {}", failed.attempt, failed.error),
                    None,
                ));
            }
            let classification = match run.outcome {
                Ok(classification) => classification,
                Err(error) => return self.fail(task, error, audit).await,
            };
            task.category = classification.category;
            task.confidence = classification.confidence;
            task.record(AuditRecord::new(
                PipelineStage::Classify,
                format!("{}: {}", classification.category, classification.rationale),
                Some(classification.confidence),
            ));
            tracing::info!(
                event_name = "pipeline.classified",
                task_id = %task.id,
                correlation_id = %audit.correlation_id,
                category = task.category.as_str(),
                confidence = task.confidence,
                attempts = classification.attempts,
                "task classified"
            );
            self.checkpoint(&task, audit, cancel).await?;
        }

        if !reached(&task, PipelineStage::Prioritize) {
            let decision = self.priority.resolve(task.category, task.confidence, intent);
            task.priority = decision.priority;
            task.record(AuditRecord::new(PipelineStage::Prioritize, decision.describe(), None));
            self.audit.emit(
                AuditEvent::new(
                    Some(task.id.clone()),
                    audit.correlation_id.clone(),
                    "task.prioritized",
                    AuditCategory::Classification,
                    audit.actor.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("priority", task.priority.as_str())
                .with_metadata("escalated", decision.escalated.to_string())
                .with_metadata("fast_path", decision.fast_path.to_string()),
            );
            self.checkpoint(&task, audit, cancel).await?;
        }

        let event = if let Some(reason) = self.review_reason(&task) {
            task.record(AuditRecord::new(
                PipelineStage::Assign,
                format!("needs review: {reason}"),
                None,
            ));
            TaskEvent::ReviewRequired
        } else {
            match self.assignment.assign(task.category).await {
                Ok(Some(assignment)) => {
                    task.record(AuditRecord::new(
                        PipelineStage::Assign,
                        assignment.describe(),
                        None,
                    ));
                    task.team = Some(assignment.team);
                    TaskEvent::ClassifiedAndAssigned
                }
                Ok(None) => {
                    task.record(AuditRecord::new(
                        PipelineStage::Assign,
                        "needs review: no automatic route",
                        None,
                    ));
                    TaskEvent::ReviewRequired
                }
                Err(error) => return self.fail(task, error, audit).await,
            }
        };
        self.lifecycle.advance_with_audit(&mut task, event, self.audit.as_ref(), audit)?;

        match self.persist_if(&task, TaskStatus::Pending).await {
            Ok(true) => {}
            Ok(false) => {
                self.release_reservation(&task).await;
                return Err(conflict(&task, TaskStatus::Pending, event));
            }
            Err(error) => {
                self.release_reservation(&task).await;
                return Err(error);
            }
        }

        self.audit.emit(
            AuditEvent::new(
                Some(task.id.clone()),
                audit.correlation_id.clone(),
                "task.submitted",
                AuditCategory::Assignment,
                audit.actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("status", task.status.as_str())
            .with_metadata("category", task.category.as_str())
            .with_metadata("priority", task.priority.as_str())
            .with_metadata("team", task.team.as_ref().map(|team| team.0.as_str()).unwrap_or("")),
        );

        Ok(task)
    }

    fn review_reason(&self, task: &Task) -> Option<String> {
        if task.category == Category::Unknown {
            return Some("category Unknown".to_string());
        }
        if task.confidence < self.review_threshold {
            return Some(format!(
                "confidence {:.2} below review threshold {:.2}",
                task.confidence, self.review_threshold
            ));
        }
        None
    }

    async fn checkpoint(
        &self,
        task: &Task,
        audit: &AuditContext,
        cancel: &CancellationFlag,
    ) -> Result<(), PipelineError> {
        if !cancel.is_cancelled() {
            return Ok(());
        }

        let stored = self.persist_if(task, TaskStatus::Pending).await?;
        tracing::info!(
            event_name = "pipeline.cancelled",
            task_id = %task.id,
            correlation_id = %audit.correlation_id,
            stages = task.audit_trail.len(),
            stored,
            "pipeline cancelled between stages"
        );
        self.audit.emit(AuditEvent::new(
            Some(task.id.clone()),
            audit.correlation_id.clone(),
            "task.cancelled",
            AuditCategory::Lifecycle,
            audit.actor.clone(),
            AuditOutcome::Rejected,
        ));
        Err(PipelineError::Cancelled { task_id: task.id.clone() })
    }

    async fn fail(
        &self,
        mut task: Task,
        error: PipelineError,
        audit: &AuditContext,
    ) -> Result<Task, PipelineError> {
        let message = error.to_string();
        tracing::warn!(
            event_name = "pipeline.task_failed",
            task_id = %task.id,
            correlation_id = %audit.correlation_id,
            error_class = error.error_class(),
            error = %message,
            "pipeline stage failed"
        );

        let expected = task.status;
        task.last_error = Some(message.clone());
        task.record(AuditRecord::new(PipelineStage::Failure, message.clone(), None));
        self.lifecycle.advance_with_audit(
            &mut task,
            TaskEvent::PipelineFailed,
            self.audit.as_ref(),
            audit,
        )?;
        if !self.persist_if(&task, expected).await? {
            return Err(conflict(&task, expected, TaskEvent::PipelineFailed));
        }

        self.audit.emit(
            AuditEvent::new(
                Some(task.id.clone()),
                audit.correlation_id.clone(),
                "task.failed",
                AuditCategory::Lifecycle,
                audit.actor.clone(),
                AuditOutcome::Failed,
            )
            .with_metadata("error_class", error.error_class())
            .with_metadata("error", message),
        );
        Ok(task)
    }

    async fn persist(&self, task: &Task) -> Result<(), PipelineError> {
        self.store.save(task).await.map_err(|error| persistence_failure(task, error))
    }

    /// Stores `task` only if the stored copy is still in `expected`.
    async fn persist_if(&self, task: &Task, expected: TaskStatus) -> Result<bool, PipelineError> {
        self.store
            .save_if_status(task, expected)
            .await
            .map_err(|error| persistence_failure(task, error))
    }

    async fn release_reservation(&self, task: &Task) {
        let Some(team) = &task.team else {
            return;
        };
        if let Err(error) = self.assignment.release(team).await {
            tracing::warn!(
                event_name = "pipeline.release_failed",
                task_id = %task.id,
                team = %team,
                error = %error,
                "could not release team capacity after a failed write"
            );
        }
    }
}

fn persistence_failure(task: &Task, error: StoreError) -> PipelineError {
    tracing::error!(
        event_name = "pipeline.persist_failed",
        task_id = %task.id,
        error = %error,
        "task could not be persisted"
    );
    PipelineError::Persistence { task: Box::new(task.clone()), message: error.to_string() }
}

fn conflict(task: &Task, expected: TaskStatus, event: TaskEvent) -> PipelineError {
    tracing::warn!(
        event_name = "pipeline.transition_conflict",
        task_id = %task.id,
        expected = expected.as_str(),
        "task was moved by another writer"
    );
    LifecycleError::ConcurrentTransition { expected, event }.into()
}

fn reached(task: &Task, stage: PipelineStage) -> bool {
    task.audit_trail.iter().any(|record| record.stage == stage)
}

fn correlation_id(metadata: &RequestMetadata) -> String {
    metadata
        .attributes
        .get(CORRELATION_ATTRIBUTE)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn describe_intent(intent: &RequestIntent) -> String {
    let join = |values: &std::collections::BTreeSet<String>| {
        values.iter().map(String::as_str).collect::<Vec<_>>().join(",")
    };
    let mut description = format!(
        "summary=\"{}\" urgency=[{}] entities=[{}]",
        intent.summary,
        join(&intent.urgency_keywords),
        join(&intent.entities)
    );
    if intent.truncated {
        description.push_str(&format!(" truncated_from={}", intent.original_chars));
    }
    description
}
