use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::task::{Task, TaskStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEvent {
    ClassifiedAndAssigned,
    ReviewRequired,
    ManualOverride,
    ReportGenerated,
    PipelineFailed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub event: TaskEvent,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: TaskStatus, event: TaskEvent },
    #[error("task left {expected:?} before {event:?} could be stored")]
    ConcurrentTransition { expected: TaskStatus, event: TaskEvent },
}

#[derive(Clone, Debug, Default)]
pub struct TaskLifecycle;

impl TaskLifecycle {
    pub fn initial_state(&self) -> TaskStatus {
        TaskStatus::Pending
    }

    pub fn apply(
        &self,
        current: TaskStatus,
        event: TaskEvent,
    ) -> Result<TransitionOutcome, LifecycleError> {
        use TaskEvent::{
            ClassifiedAndAssigned, ManualOverride, PipelineFailed, ReportGenerated,
            ReviewRequired,
        };
        use TaskStatus::{Assigned, Closed, Failed, NeedsReview, Pending};

        let to = match (current, event) {
            (Pending, ClassifiedAndAssigned) => Assigned,
            (Pending, ReviewRequired) => NeedsReview,
            (NeedsReview, ManualOverride) => Assigned,
            (Assigned, ReportGenerated) => Closed,
            (Pending | Assigned | NeedsReview, PipelineFailed) => Failed,
            _ => return Err(LifecycleError::InvalidTransition { state: current, event }),
        };

        Ok(TransitionOutcome { from: current, to, event })
    }

    /// Applies `event` to the task in place. The task is untouched on error.
    pub fn advance(
        &self,
        task: &mut Task,
        event: TaskEvent,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let outcome = self.apply(task.status, event)?;
        task.transition_to(outcome.to).map_err(|_| LifecycleError::InvalidTransition {
            state: outcome.from,
            event,
        })?;
        Ok(outcome)
    }

    pub fn advance_with_audit<S>(
        &self,
        task: &mut Task,
        event: TaskEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, LifecycleError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.advance(task, event);
        match &result {
            Ok(outcome) => sink.emit(
                AuditEvent::new(
                    Some(task.id.clone()),
                    audit.correlation_id.clone(),
                    "task.transition_applied",
                    AuditCategory::Lifecycle,
                    audit.actor.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str())
                .with_metadata("event", format!("{:?}", outcome.event)),
            ),
            Err(error) => sink.emit(
                AuditEvent::new(
                    Some(task.id.clone()),
                    audit.correlation_id.clone(),
                    "task.transition_rejected",
                    AuditCategory::Lifecycle,
                    audit.actor.clone(),
                    AuditOutcome::Rejected,
                )
                .with_metadata("error", error.to_string()),
            ),
        }
        result
    }
}
