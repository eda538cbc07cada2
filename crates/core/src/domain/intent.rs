use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Structured view of a raw request, produced once per pipeline run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIntent {
    pub raw_text: String,
    pub summary: String,
    pub urgency_keywords: BTreeSet<String>,
    pub entities: BTreeSet<String>,
    pub truncated: bool,
    pub original_chars: usize,
}

impl RequestIntent {
    pub fn is_urgent(&self) -> bool {
        !self.urgency_keywords.is_empty()
    }
}
