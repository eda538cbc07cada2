use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::task::{PipelineStage, Task, TaskId, TaskStatus};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub by_team: BTreeMap<String, usize>,
    /// Mean confidence over tasks that reached the classify stage.
    pub average_confidence: Option<f64>,
    pub manual_overrides: usize,
    pub awaiting_review: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    /// Assigned tasks closed while producing this report.
    pub closed: Vec<TaskId>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Reporter;

impl Reporter {
    pub fn summarize(&self, tasks: &[Task]) -> TaskReport {
        let mut report = TaskReport {
            generated_at: Utc::now(),
            total: tasks.len(),
            by_status: BTreeMap::new(),
            by_category: BTreeMap::new(),
            by_priority: BTreeMap::new(),
            by_team: BTreeMap::new(),
            average_confidence: None,
            manual_overrides: 0,
            awaiting_review: Vec::new(),
            failed: Vec::new(),
            closed: Vec::new(),
        };

        let mut confidence_sum = 0.0;
        let mut classified = 0usize;

        for task in tasks {
            *report.by_status.entry(task.status.as_str().to_string()).or_default() += 1;
            *report.by_category.entry(task.category.as_str().to_string()).or_default() += 1;
            *report.by_priority.entry(task.priority.as_str().to_string()).or_default() += 1;
            if let Some(team) = &task.team {
                *report.by_team.entry(team.0.clone()).or_default() += 1;
            }

            if task.audit_trail.iter().any(|record| record.stage == PipelineStage::Classify) {
                confidence_sum += task.confidence;
                classified += 1;
            }
            if task.manual_override {
                report.manual_overrides += 1;
            }

            match task.status {
                TaskStatus::NeedsReview => report.awaiting_review.push(task.id.clone()),
                TaskStatus::Failed => report.failed.push(task.id.clone()),
                _ => {}
            }
        }

        if classified > 0 {
            report.average_confidence = Some(confidence_sum / classified as f64);
        }
        report
    }

    pub fn render_text(&self, report: &TaskReport) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "task report generated at {}", report.generated_at.to_rfc3339());
        let _ = writeln!(out, "total tasks: {}", report.total);
        match report.average_confidence {
            Some(average) => {
                let _ = writeln!(out, "average confidence: {average:.2}");
            }
            None => {
                let _ = writeln!(out, "average confidence: n/a");
            }
        }
        let _ = writeln!(out, "manual overrides: {}", report.manual_overrides);

        for (title, counts) in [
            ("status", &report.by_status),
            ("category", &report.by_category),
            ("priority", &report.by_priority),
            ("team", &report.by_team),
        ] {
            let _ = writeln!(out, "by {title}:");
            if counts.is_empty() {
                let _ = writeln!(out, "  (none)");
            }
            for (key, count) in counts {
                let _ = writeln!(out, "  {key}: {count}");
            }
        }

        for (title, ids) in [
            ("awaiting review", &report.awaiting_review),
            ("failed", &report.failed),
            ("closed by this report", &report.closed),
        ] {
            if ids.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{title}:");
            for id in ids {
                let _ = writeln!(out, "  - {id}");
            }
        }

        out.trim_end().to_string()
    }
}
