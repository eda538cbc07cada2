use thiserror::Error;

use crate::domain::task::{Category, Task, TaskId, TaskStatus};
use crate::domain::team::TeamId;
use crate::lifecycle::LifecycleError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid task transition from {from:?} to {to:?}")]
    InvalidTaskTransition { from: TaskStatus, to: TaskStatus },
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Everything the pipeline can report to a caller. Valid input only ever
/// produces `Persistence` or `Cancelled`; the rest are rejects or lookups.
#[derive(Clone, Debug, Error)]
pub enum PipelineError {
    #[error("request text is empty")]
    EmptyInput,
    #[error("classification unavailable after {attempts} attempt(s): {last_error}")]
    ClassificationUnavailable { attempts: u32, last_error: String },
    #[error("no team is mapped to category {category}")]
    NoTeamAvailable { category: Category },
    #[error("team directory failure: {0}")]
    Directory(String),
    #[error("unknown team `{0}`")]
    UnknownTeam(TeamId),
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("task store failure: {0}")]
    Store(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure for task {}: {message}", task.id)]
    Persistence { task: Box<Task>, message: String },
    #[error("pipeline cancelled for task {task_id}")]
    Cancelled { task_id: TaskId },
}

impl PipelineError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::EmptyInput => "empty_input",
            Self::ClassificationUnavailable { .. } => "classification_unavailable",
            Self::NoTeamAvailable { .. } => "no_team_available",
            Self::Directory(_) => "team_directory",
            Self::UnknownTeam(_) => "unknown_team",
            Self::TaskNotFound(_) => "task_not_found",
            Self::Store(_) => "task_store",
            Self::Domain(_) => "domain_validation",
            Self::Persistence { .. } => "persistence",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// The in-memory task, when the failure happened after one was created.
    pub fn into_task(self) -> Option<Task> {
        match self {
            Self::Persistence { task, .. } => Some(*task),
            _ => None,
        }
    }
}

impl From<LifecycleError> for PipelineError {
    fn from(value: LifecycleError) -> Self {
        Self::Domain(DomainError::Lifecycle(value))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<PipelineError> for ApplicationError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Domain(domain) => Self::Domain(domain),
            PipelineError::EmptyInput
            | PipelineError::UnknownTeam(_)
            | PipelineError::TaskNotFound(_)
            | PipelineError::Cancelled { .. } => Self::Rejected(value.to_string()),
            PipelineError::Persistence { message, .. } | PipelineError::Store(message) => {
                Self::Persistence(message)
            }
            PipelineError::ClassificationUnavailable { .. } | PipelineError::Directory(_) => {
                Self::Integration(value.to_string())
            }
            PipelineError::NoTeamAvailable { .. } => Self::Configuration(value.to_string()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(domain) => Self::BadRequest {
                message: domain.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Rejected(message) => {
                Self::BadRequest { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}
