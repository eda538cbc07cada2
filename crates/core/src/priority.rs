use crate::config::PipelineConfig;
use crate::domain::intent::RequestIntent;
use crate::domain::task::{Category, Priority};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorityDecision {
    pub priority: Priority,
    pub base: Priority,
    pub escalated: bool,
    pub fast_path: bool,
}

impl PriorityDecision {
    pub fn describe(&self) -> String {
        if self.fast_path {
            format!("{} (fast path from {})", self.priority, self.base)
        } else if self.escalated {
            format!("{} (escalated from {})", self.priority, self.base)
        } else {
            self.priority.to_string()
        }
    }
}

#[derive(Clone, Debug)]
pub struct PriorityResolver {
    fast_path_confidence: f64,
}

impl Default for PriorityResolver {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl PriorityResolver {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self { fast_path_confidence: config.fast_path_confidence }
    }

    pub fn base_priority(category: Category) -> Priority {
        match category {
            Category::It | Category::Unknown => Priority::Medium,
            Category::Hr | Category::Operations => Priority::Low,
        }
    }

    pub fn resolve(
        &self,
        category: Category,
        confidence: f64,
        intent: &RequestIntent,
    ) -> PriorityDecision {
        let base = Self::base_priority(category);
        if category == Category::Unknown {
            return PriorityDecision { priority: base, base, escalated: false, fast_path: false };
        }

        let urgent = intent.is_urgent();
        if urgent && category == Category::It && confidence >= self.fast_path_confidence {
            return PriorityDecision {
                priority: Priority::Critical,
                base,
                escalated: true,
                fast_path: true,
            };
        }

        let priority = if urgent { base.escalate() } else { base };
        PriorityDecision { priority, base, escalated: urgent, fast_path: false }
    }
}
