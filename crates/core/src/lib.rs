pub mod assignment;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod extractor;
pub mod lifecycle;
pub mod pipeline;
pub mod priority;
pub mod reporter;
pub mod store;

pub use assignment::{
    Assignment, AssignmentEngine, DirectoryError, InMemoryTeamDirectory, TeamDirectory,
};
pub use classifier::{
    CapabilityError, ClassificationRun, ClassifierAgent, FailedAttempt, KeywordClassifier,
    TextClassifier, Verdict,
};
pub use domain::classification::ClassificationResult;
pub use domain::intent::RequestIntent;
pub use domain::task::{
    AuditRecord, Category, PipelineStage, Priority, RequestMetadata, Task, TaskId, TaskStatus,
};
pub use domain::team::{Team, TeamId};
pub use errors::{ApplicationError, DomainError, InterfaceError, PipelineError};
pub use extractor::IntentExtractor;
pub use lifecycle::{LifecycleError, TaskEvent, TaskLifecycle};
pub use pipeline::{CancellationFlag, Pipeline};
pub use priority::{PriorityDecision, PriorityResolver};
pub use reporter::{Reporter, TaskReport};
pub use store::{InMemoryTaskStore, StoreError, TaskStore};
