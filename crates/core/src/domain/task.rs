use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::team::TeamId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "IT")]
    It,
    #[serde(rename = "HR")]
    Hr,
    Operations,
    Unknown,
}

impl Category {
    /// Categories a classifier may choose from. `Unknown` is never offered.
    pub const ROUTABLE: [Category; 3] = [Category::It, Category::Hr, Category::Operations];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::It => "IT",
            Self::Hr => "HR",
            Self::Operations => "Operations",
            Self::Unknown => "Unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "it" => Some(Self::It),
            "hr" => Some(Self::Hr),
            "operations" | "ops" => Some(Self::Operations),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    NeedsReview,
    Closed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::NeedsReview => "needs_review",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "needs_review" | "needsreview" => Some(Self::NeedsReview),
            "closed" => Some(Self::Closed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Extract,
    ClassifyAttempt,
    Classify,
    Prioritize,
    Assign,
    Failure,
    Override,
    Close,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::ClassifyAttempt => "classify_attempt",
            Self::Classify => "classify",
            Self::Prioritize => "prioritize",
            Self::Assign => "assign",
            Self::Failure => "failure",
            Self::Override => "override",
            Self::Close => "close",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "extract" => Some(Self::Extract),
            "classify_attempt" => Some(Self::ClassifyAttempt),
            "classify" => Some(Self::Classify),
            "prioritize" => Some(Self::Prioritize),
            "assign" => Some(Self::Assign),
            "failure" => Some(Self::Failure),
            "override" => Some(Self::Override),
            "close" => Some(Self::Close),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub stage: PipelineStage,
    pub output: String,
    pub confidence: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(stage: PipelineStage, output: impl Into<String>, confidence: Option<f64>) -> Self {
        Self { stage, output: output.into(), confidence, recorded_at: Utc::now() }
    }
}

/// Caller-supplied context attached to a request, e.g. the channel it came from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub source_channel: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl RequestMetadata {
    pub fn from_channel(channel: impl Into<String>) -> Self {
        Self { source_channel: Some(channel.into()), attributes: BTreeMap::new() }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub request_text: String,
    pub category: Category,
    pub confidence: f64,
    pub priority: Priority,
    pub team: Option<TeamId>,
    pub status: TaskStatus,
    pub metadata: RequestMetadata,
    pub manual_override: bool,
    pub last_error: Option<String>,
    pub audit_trail: Vec<AuditRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(request_text: impl Into<String>, metadata: RequestMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            request_text: request_text.into(),
            category: Category::Unknown,
            confidence: 0.0,
            priority: Priority::Medium,
            team: None,
            status: TaskStatus::Pending,
            metadata,
            manual_override: false,
            last_error: None,
            audit_trail: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record(&mut self, record: AuditRecord) {
        self.updated_at = record.recorded_at;
        self.audit_trail.push(record);
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self.status, next),
            (TaskStatus::Pending, TaskStatus::Assigned)
                | (TaskStatus::Pending, TaskStatus::NeedsReview)
                | (TaskStatus::NeedsReview, TaskStatus::Assigned)
                | (TaskStatus::Assigned, TaskStatus::Closed)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Assigned, TaskStatus::Failed)
                | (TaskStatus::NeedsReview, TaskStatus::Failed)
        )
    }

    pub fn transition_to(&mut self, next: TaskStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            self.updated_at = Utc::now();
            return Ok(());
        }

        Err(DomainError::InvalidTaskTransition { from: self.status, to: next })
    }

    /// A known category and a team may only coexist on a confident decision,
    /// a task parked for review, or a manual override.
    pub fn satisfies_assignment_invariant(&self, review_threshold: f64) -> bool {
        let both_set = self.category != Category::Unknown && self.team.is_some();
        !both_set
            || self.confidence >= review_threshold
            || self.status == TaskStatus::NeedsReview
            || self.manual_override
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, Priority, Task, TaskStatus};
    use crate::domain::task::RequestMetadata;
    use crate::domain::team::TeamId;
    use crate::errors::DomainError;

    fn task(status: TaskStatus) -> Task {
        let mut task = Task::new("printer on floor 3 is jammed", RequestMetadata::default());
        task.status = status;
        task
    }

    #[test]
    fn allows_review_then_override_lifecycle() {
        let mut task = task(TaskStatus::Pending);
        task.transition_to(TaskStatus::NeedsReview).expect("pending -> needs_review");
        task.transition_to(TaskStatus::Assigned).expect("needs_review -> assigned");
        task.transition_to(TaskStatus::Closed).expect("assigned -> closed");
        assert_eq!(task.status, TaskStatus::Closed);
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        for terminal in [TaskStatus::Closed, TaskStatus::Failed] {
            let mut task = task(terminal);
            let error =
                task.transition_to(TaskStatus::Assigned).expect_err("terminal must not move");
            assert!(matches!(error, DomainError::InvalidTaskTransition { .. }));
        }
    }

    #[test]
    fn pending_cannot_close_directly() {
        let mut task = task(TaskStatus::Pending);
        assert!(task.transition_to(TaskStatus::Closed).is_err());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn priority_escalation_saturates_at_critical() {
        assert_eq!(Priority::Low.escalate(), Priority::Medium);
        assert_eq!(Priority::High.escalate(), Priority::Critical);
        assert_eq!(Priority::Critical.escalate(), Priority::Critical);
    }

    #[test]
    fn category_parsing_accepts_common_spellings() {
        assert_eq!(Category::parse("it"), Some(Category::It));
        assert_eq!(Category::parse(" HR "), Some(Category::Hr));
        assert_eq!(Category::parse("ops"), Some(Category::Operations));
        assert_eq!(Category::parse("finance"), None);
    }

    #[test]
    fn assignment_invariant_flags_low_confidence_auto_assignment() {
        let mut task = task(TaskStatus::Assigned);
        task.category = Category::Hr;
        task.team = Some(TeamId("hr-people-ops".to_string()));
        task.confidence = 0.55;
        assert!(!task.satisfies_assignment_invariant(0.6));

        task.manual_override = true;
        assert!(task.satisfies_assignment_invariant(0.6));
    }

    #[test]
    fn status_round_trips_from_storage_encoding() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Assigned,
            TaskStatus::NeedsReview,
            TaskStatus::Closed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
    }
}
